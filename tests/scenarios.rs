use scaled_ptr_check::checker::{CheckerRegistry, CheckerSettings};
use scaled_ptr_check::diagnostics::Diagnostic;
use scaled_ptr_check::engine::AnalyzerOptions;
use scaled_ptr_check::{AnalysisEngine, create_default_engine};

const RIGHT: &str =
    "In pointer arithmetic right argument is calculated from a sizeof or offsetof expression";
const LEFT: &str =
    "In pointer arithmetic left argument is calculated from a sizeof or offsetof expression";

fn analyze(src: &str) -> Vec<Diagnostic> {
    create_default_engine()
        .analyze_source(src, Some("test.c"))
        .expect("analysis should succeed")
}

fn analyze_with(src: &str, options: AnalyzerOptions) -> Vec<Diagnostic> {
    let registry = CheckerRegistry::default_checkers_filtered(&[], &[], &[], &options)
        .expect("registry");
    AnalysisEngine::new_with_settings(registry, CheckerSettings::default(), options)
        .analyze_source(src, Some("test.c"))
        .expect("analysis should succeed")
}

fn messages(diags: &[Diagnostic]) -> Vec<&str> {
    diags.iter().map(|d| d.message.as_str()).collect()
}

#[test]
fn scenario_a_int_pointer_plus_sizeof() {
    let diags = analyze("void f(void) {\n  int *p;\n  p = p + sizeof(int);\n}\n");
    assert_eq!(messages(&diags), [RIGHT]);
    assert_eq!(diags[0].span.start.row, 3);
    assert_eq!(diags[0].checker.name, "bad_scaled_pointer_arithmetic");
    assert_eq!(diags[0].bug_type, "Badly scaled pointer arithmetic");
    assert_eq!(diags[0].category, "Suspicious operation");
}

#[test]
fn scenario_b_char_pointer_is_excluded() {
    let diags = analyze("void f(void) {\n  char *p;\n  p = p + sizeof(int);\n}\n");
    assert!(diags.is_empty(), "{diags:#?}");
}

#[test]
fn scenario_c_compound_offsetof() {
    let src = r#"
typedef struct { int a; int field; } S;
void f(void) {
  int *p;
  p += offsetof(S, field);
}
"#;
    let diags = analyze(src);
    assert_eq!(messages(&diags), [RIGHT]);
}

#[test]
fn scenario_d_tag_survives_a_variable() {
    let src = "void f(void) {\n  int x = sizeof(int);\n  int *p;\n  p = p + x;\n}\n";
    let diags = analyze(src);
    assert_eq!(messages(&diags), [RIGHT]);
    assert_eq!(diags[0].span.start.row, 4);
}

#[test]
fn scenario_e_plain_integer_is_not_reported() {
    let diags = analyze("void f(void) {\n  int *p;\n  int n = 5;\n  p = p + n;\n}\n");
    assert!(diags.is_empty(), "{diags:#?}");
}

#[test]
fn left_operand_is_named() {
    let diags = analyze("void f(int *p) { p = sizeof(int) + p; }\n");
    assert_eq!(messages(&diags), [LEFT]);
}

#[test]
fn findings_inside_callees_need_a_tagged_argument() {
    let src = r#"
typedef unsigned long size_t;
int *step(int *p, size_t n) { return p + n; }
int *plain(int *q) { return step(q, 2); }
"#;
    assert!(analyze(src).is_empty());

    let src = r#"
typedef unsigned long size_t;
int *step(int *p, size_t n) { return p + n; }
int *scaled(int *q) { return step(q, sizeof(long)); }
"#;
    let diags = analyze(src);
    assert_eq!(messages(&diags), [RIGHT]);
    assert_eq!(diags[0].span.start.row, 3);
    assert!(diags[0].notes.iter().any(|n| n.contains("`scaled`")));
}

#[test]
fn arithmetic_drops_the_tag_unless_asked_to_keep_it() {
    let src = "void f(int *p) {\n  unsigned long n = sizeof(int) * 2;\n  p = p + n;\n}\n";
    assert!(analyze(src).is_empty());

    let options = AnalyzerOptions {
        propagate_through_arithmetic: true,
        ..AnalyzerOptions::default()
    };
    assert_eq!(messages(&analyze_with(src, options)), [RIGHT]);
}

#[test]
fn infeasible_paths_are_not_reported() {
    let src = r#"
void f(int *p, int flag) {
  unsigned long n = 1;
  if (flag)
    n = sizeof(int);
  if (!flag)
    p = p + n;
}
"#;
    assert!(analyze(src).is_empty());
}

#[test]
fn one_finding_per_site_across_loop_iterations() {
    let src = r#"
void f(int *p) {
  int i;
  for (i = 0; i < 2; i++)
    p = p + sizeof(int);
}
"#;
    assert_eq!(analyze(src).len(), 1);
}

#[test]
fn paths_past_the_loop_bound_are_dropped() {
    let src = r#"
void f(int *p) {
  int i;
  for (i = 0; i < 8; i++) { }
  p = p + sizeof(int);
}
"#;
    assert!(analyze(src).is_empty());

    let options = AnalyzerOptions {
        loop_bound: 8,
        ..AnalyzerOptions::default()
    };
    assert_eq!(analyze_with(src, options).len(), 1);
}

#[test]
fn each_site_is_reported_separately() {
    let src = r#"
void f(int *p, long *q) {
  p = p + sizeof(int);
  q = q - sizeof(long);
}
"#;
    let diags = analyze(src);
    let rows: Vec<usize> = diags.iter().map(|d| d.span.start.row).collect();
    assert_eq!(rows, [3, 4]);
}

#[test]
fn skipping_the_checker_silences_it() {
    let options = AnalyzerOptions::default();
    let registry = CheckerRegistry::default_checkers_filtered(
        &[],
        &["bad_scaled_pointer_arithmetic".to_string()],
        &[],
        &options,
    )
    .expect("registry");
    let engine = AnalysisEngine::new_with_settings(registry, CheckerSettings::default(), options);
    let diags = engine
        .analyze_source("void f(int *p) { p = p + sizeof(int); }\n", None)
        .expect("analysis should succeed");
    assert!(diags.is_empty());
}

#[test]
fn ilp32_target_changes_nothing_about_byte_pointers() {
    let options = AnalyzerOptions {
        target: scaled_ptr_check::types::TargetLayout { pointer_width: 4 },
        ..AnalyzerOptions::default()
    };
    let src = "void f(char *c, int *p) {\n  c = c + sizeof(long);\n  p = p + sizeof(long);\n}\n";
    let diags = analyze_with(src, options);
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].span.start.row, 3);
}

#[test]
fn unsupported_constructs_do_not_abort_analysis() {
    let src = r#"
void f(int *p, int k) {
  if (k)
    goto done;
  p = p + sizeof(int);
done:
  p = p + 1;
}
"#;
    assert_eq!(analyze(src).len(), 1);
}

#[test]
fn bool_pointee_is_one_char() {
    let src = "void f(_Bool *p, signed char *s) {\n  p = p + sizeof(int);\n  s = s + sizeof(int);\n}\n";
    assert!(analyze(src).is_empty(), "{:#?}", analyze(src));
}

const AGGREGATES: &str = r#"
typedef unsigned long size_t;
struct T { size_t n; };
"#;

fn analyze_aggregate(body: &str) -> Vec<Diagnostic> {
    analyze(&format!("{AGGREGATES}{body}"))
}

#[test]
fn tag_survives_struct_assignment() {
    let diags = analyze_aggregate(
        "void f(int *p) {\n  struct T t, u;\n  t.n = sizeof(int);\n  u = t;\n  p = p + u.n;\n}\n",
    );
    assert_eq!(messages(&diags), [RIGHT]);
    assert_eq!(diags[0].span.start.row, 8);
}

#[test]
fn tag_survives_struct_copy_initialisation() {
    let diags = analyze_aggregate(
        "void f(int *p) {\n  struct T t;\n  t.n = sizeof(int);\n  struct T u = t;\n  p = p + u.n;\n}\n",
    );
    assert_eq!(messages(&diags), [RIGHT]);
}

#[test]
fn tag_survives_struct_passed_by_value() {
    let diags = analyze_aggregate(
        "int *take(int *p, struct T t) {\n  return p + t.n;\n}\n\
         int *give(int *p) {\n  struct T t;\n  t.n = sizeof(int);\n  return take(p, t);\n}\n",
    );
    assert_eq!(messages(&diags), [RIGHT]);
    assert_eq!(diags[0].span.start.row, 5);
    assert!(diags[0].notes.iter().any(|n| n.contains("`give`")));
}

#[test]
fn tag_survives_struct_returned_by_value() {
    let diags = analyze_aggregate(
        "struct T make(void) {\n  struct T t;\n  t.n = sizeof(int);\n  return t;\n}\n\
         void f(int *p) {\n  struct T u = make();\n  p = p + u.n;\n}\n",
    );
    assert_eq!(messages(&diags), [RIGHT]);
}

#[test]
fn brace_initialisers_bind_fields() {
    let diags = analyze_aggregate(
        "typedef struct { int k; size_t n; } P;\n\
         void f(int *p) {\n  struct T t = { sizeof(int) };\n  p = p + t.n;\n}\n\
         void g(int *p) {\n  P q = { .n = offsetof(P, n) };\n  p = p + q.k;\n  p = p + q.n;\n}\n\
         void h(int *p) {\n  size_t sizes[2] = { 1, sizeof(long) };\n  p = p + sizes[0];\n  p = p + sizes[1];\n}\n",
    );
    let rows: Vec<usize> = diags.iter().map(|d| d.span.start.row).collect();
    assert_eq!(rows, [7, 12, 17], "{diags:#?}");
}

#[test]
fn unrelated_fields_stay_untagged_after_copy() {
    let diags = analyze_aggregate(
        "struct P { size_t a; size_t b; };\n\
         void f(int *p) {\n  struct P x = { sizeof(int), 2 };\n  struct P y;\n  y = x;\n  p = p + y.b;\n}\n",
    );
    assert!(diags.is_empty(), "{diags:#?}");
}

#[test]
fn switch_cases_are_explored() {
    let src = r#"
void f(int *p, int c) {
  switch (c) {
  case 1:
    p = p + sizeof(int);
    break;
  default:
    break;
  }
}
"#;
    let diags = analyze(src);
    assert_eq!(messages(&diags), [RIGHT]);
    assert_eq!(diags[0].span.start.row, 5);
}

#[test]
fn switch_on_a_known_value_takes_one_arm() {
    let src = r#"
void f(int *p) {
  int c = 2;
  switch (c) {
  case 1:
    p = p + sizeof(int);
    break;
  case 2:
    break;
  }
}
"#;
    assert!(analyze(src).is_empty());
}
