#![allow(dead_code)]

//! Match `// expected-warning {{...}}` comments in a C fixture against the
//! findings of an analysis run.

use regex::Regex;
use scaled_ptr_check::diagnostics::Diagnostic;
use std::collections::BTreeSet;

/// `(row, message)` pairs announced by the fixture's comments.
pub fn expected_warnings(source: &str) -> BTreeSet<(usize, String)> {
    let re = Regex::new(r"expected-warning\s*\{\{(.*?)\}\}").expect("valid regex");
    source
        .lines()
        .enumerate()
        .flat_map(|(index, line)| {
            re.captures_iter(line)
                .map(move |cap| (index + 1, cap[1].to_string()))
                .collect::<Vec<_>>()
        })
        .collect()
}

pub fn actual_warnings(diags: &[Diagnostic]) -> BTreeSet<(usize, String)> {
    diags
        .iter()
        .map(|d| (d.span.start.row, d.message.clone()))
        .collect()
}

/// Panic with a readable listing unless expectations and findings agree.
pub fn verify(name: &str, source: &str, diags: &[Diagnostic]) {
    let expected = expected_warnings(source);
    let actual = actual_warnings(diags);
    if expected == actual {
        return;
    }
    let missing: Vec<_> = expected.difference(&actual).collect();
    let unexpected: Vec<_> = actual.difference(&expected).collect();
    panic!(
        "{name}: findings do not match expectations\n  expected but not seen: {missing:#?}\n  seen but not expected: {unexpected:#?}"
    );
}
