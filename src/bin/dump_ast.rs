//! Print the tree-sitter syntax tree of a C file, or with `--typed` the
//! lowered declarations with their resolved types.

use anyhow::Context;
use scaled_ptr_check::parser::{node_text, parse_source};
use scaled_ptr_check::sema;
use scaled_ptr_check::types::TargetLayout;
use std::env;
use std::fs;
use std::process::ExitCode;

fn print_tree(node: tree_sitter::Node, source: &str, indent: usize) {
    let indent_str = "  ".repeat(indent);
    let text = node_text(node, source);
    let text_display: String = if text.chars().count() > 50 {
        format!("{}...", text.chars().take(50).collect::<String>())
    } else {
        text.to_string()
    };
    let text_display = text_display.replace('\n', "\\n");

    println!("{}{}  \"{}\"", indent_str, node.kind(), text_display);

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        print_tree(child, source, indent + 1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let (typed, file_path) = match args.as_slice() {
        [flag, path] if flag == "--typed" => (true, path),
        [path] => (false, path),
        _ => anyhow::bail!("Usage: dump_ast [--typed] <file.c>"),
    };

    let source =
        fs::read_to_string(file_path).with_context(|| format!("failed to read {file_path}"))?;
    let tree = parse_source(&source)?;

    println!("AST for {}:", file_path);
    println!("================");
    if !typed {
        print_tree(tree.root_node(), &source, 0);
        return Ok(());
    }

    let tu = sema::lower(&tree, &source, TargetLayout::default())?;
    for var in &tu.vars {
        println!("var {} : {} ({:?})", var.name, tu.types.spell(&var.ty), var.storage);
    }
    for function in &tu.functions {
        let kind = if function.body.is_some() { "definition" } else { "declaration" };
        println!("fn {} -> {} [{kind}]", function.name, tu.types.spell(&function.ret));
        if let Some(body) = &function.body {
            println!("{body:#?}");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}
