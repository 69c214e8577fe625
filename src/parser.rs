use anyhow::{Context, Result};
use tree_sitter::{Language, Node, Parser, Tree};

fn c_language() -> Language {
    tree_sitter_c::language()
}

pub fn parse_source(source: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(c_language())
        .context("failed to load C grammar")?;

    parser
        .parse(source, None)
        .context("tree-sitter failed to parse source")
}

/// Source text of `node`; empty if the range is not valid UTF-8.
pub fn node_text<'src>(node: Node<'_>, source: &'src str) -> &'src str {
    source.get(node.byte_range()).unwrap_or("")
}

/// Count `ERROR`/missing nodes, used to log partially parsed files.
pub fn count_error_nodes(node: Node<'_>) -> usize {
    let own = usize::from(node.is_error() || node.is_missing());
    if !node.has_error() {
        return own;
    }
    let mut cursor = node.walk();
    let children: usize = node.children(&mut cursor).map(count_error_nodes).sum();
    own + children
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pointer_arithmetic_without_errors() {
        let src = "void f(int *p) { p = p + sizeof(int); }\n";
        let tree = parse_source(src).expect("parse");
        assert_eq!(count_error_nodes(tree.root_node()), 0);
        assert_eq!(tree.root_node().kind(), "translation_unit");
    }

    #[test]
    fn reports_error_nodes_for_garbage() {
        let src = "void f( { ))) int\n";
        let tree = parse_source(src).expect("parse");
        assert!(count_error_nodes(tree.root_node()) > 0);
    }
}
