mod support;

use scaled_ptr_check::create_default_engine;
use std::path::Path;
use support::verify::verify;

fn run_fixture(name: &str) {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/verify")
        .join(name);
    let source = std::fs::read_to_string(&path).expect("fixture should exist");
    let diags = create_default_engine()
        .analyze_source(&source, Some(name))
        .expect("analysis should succeed");
    verify(name, &source, &diags);
}

#[test]
fn basic_operand_roles_and_exclusions() {
    run_fixture("basic.c");
}

#[test]
fn provenance_follows_values_along_paths() {
    run_fixture("flow.c");
}

#[test]
fn unprovable_pointee_sizes_are_reported() {
    run_fixture("opaque.c");
}

#[test]
fn switch_cases_fork_and_fall_through() {
    run_fixture("switch.c");
}
