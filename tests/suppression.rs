use scaled_ptr_check::create_default_engine;
use scaled_ptr_check::level::Level;

#[test]
fn allow_comment_on_previous_line_suppresses() {
    let engine = create_default_engine();

    let src = r#"
void f(int *p) {
  // scaled-ptr-check: allow(bad_scaled_pointer_arithmetic)
  p = p + sizeof(int);
}
"#;

    let diags = engine.analyze_source(src, None).expect("analysis should succeed");
    assert!(diags.is_empty(), "expected allow to suppress, got: {diags:#?}");
}

#[test]
fn allow_covers_only_the_next_line() {
    let engine = create_default_engine();

    let src = r#"
void f(int *p) {
  p = p + sizeof(int); // scaled-ptr-check: allow(suspicious)

  p = p + sizeof(int);
}
"#;

    let diags = engine.analyze_source(src, None).expect("analysis should succeed");
    assert_eq!(diags.len(), 1, "{diags:#?}");
    assert_eq!(diags[0].span.start.row, 5);
}

#[test]
fn deny_promotes_to_error() {
    let engine = create_default_engine();

    let src = r#"
void f(int *p) {
  /* scaled-ptr-check: deny(bad_scaled_pointer_arithmetic) */
  p = p + sizeof(int);
}
"#;

    let diags = engine.analyze_source(src, None).expect("analysis should succeed");
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].level, Level::Error);
}

#[test]
fn file_level_allow_suppresses_everywhere() {
    let engine = create_default_engine();

    let src = r#"// scaled-ptr-check: allow-file(all)
void f(int *p) { p = p + sizeof(int); }
void g(long *q) { q -= sizeof(long); }
"#;

    let diags = engine.analyze_source(src, None).expect("analysis should succeed");
    assert!(diags.is_empty(), "{diags:#?}");
}

#[test]
fn without_directive_the_checker_fires() {
    let engine = create_default_engine();
    let diags = engine
        .analyze_source("void f(int *p) { p = p + sizeof(int); }\n", None)
        .expect("analysis should succeed");
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].level, Level::Warn);
}
