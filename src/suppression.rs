//! Comment directives that adjust findings in C sources.
//!
//! - `// scaled-ptr-check: allow(name)` silences `name` on the directive's
//!   line and the line after it.
//! - `// scaled-ptr-check: deny(name)` promotes `name` to an error there.
//! - `// scaled-ptr-check: allow-file(name)` silences `name` in the whole file.
//!
//! `name` may be a checker name, a category such as `suspicious`, or `all`.
//! Block comments (`/* ... */`) are accepted as well.

use std::collections::{HashMap, HashSet};

use crate::level::Level;

const DIRECTIVE_PREFIX: &str = "scaled-ptr-check:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Allow(String),
    Deny(String),
    AllowFile(String),
}

fn parse_directive(comment: &str) -> Option<Directive> {
    let start = comment.find(DIRECTIVE_PREFIX)? + DIRECTIVE_PREFIX.len();
    let compact: String = comment[start..]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let compact = compact.trim_end_matches("*/");

    let (kind, rest) = compact.split_once('(')?;
    let name = rest.split_once(')')?.0.to_string();
    if name.is_empty() {
        return None;
    }
    match kind {
        "allow" => Some(Directive::Allow(name)),
        "deny" => Some(Directive::Deny(name)),
        "allow-file" => Some(Directive::AllowFile(name)),
        _ => None,
    }
}

/// Directives found in one source file, indexed by 1-based row.
#[derive(Debug, Default, Clone)]
pub struct SuppressionMap {
    file_allowed: HashSet<String>,
    allowed: HashMap<usize, HashSet<String>>,
    denied: HashMap<usize, HashSet<String>>,
}

impl SuppressionMap {
    pub fn from_source(source: &str) -> Self {
        let mut map = Self::default();
        for (index, line) in source.lines().enumerate() {
            let row = index + 1;
            let Some(comment_start) = line.find("//").or_else(|| line.find("/*")) else {
                continue;
            };
            let Some(directive) = parse_directive(&line[comment_start..]) else {
                continue;
            };
            match directive {
                Directive::AllowFile(name) => {
                    map.file_allowed.insert(name);
                }
                Directive::Allow(name) => {
                    for r in [row, row + 1] {
                        map.allowed.entry(r).or_default().insert(name.clone());
                    }
                }
                Directive::Deny(name) => {
                    for r in [row, row + 1] {
                        map.denied.entry(r).or_default().insert(name.clone());
                    }
                }
            }
        }
        map
    }

    fn matches(names: Option<&HashSet<String>>, checker: &str, category: &str) -> bool {
        names.is_some_and(|set| {
            set.contains(checker) || set.contains(category) || set.contains("all")
        })
    }

    /// Effective level of a finding of `checker` reported at `row`.
    pub fn level_for(&self, checker: &str, category: &str, row: usize, configured: Level) -> Level {
        if Self::matches(Some(&self.file_allowed), checker, category) {
            return Level::Allow;
        }
        if Self::matches(self.allowed.get(&row), checker, category) {
            return Level::Allow;
        }
        if Self::matches(self.denied.get(&row), checker, category) {
            return Level::Error;
        }
        configured
    }
}
