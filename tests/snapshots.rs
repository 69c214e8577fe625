use insta::assert_snapshot;
use scaled_ptr_check::create_default_engine;

fn render(src: &str, file: &str) -> String {
    let diags = create_default_engine()
        .analyze_source(src, Some(file))
        .expect("analysis should succeed");
    let mut out = String::new();
    for diag in &diags {
        out.push_str(&diag.render());
        out.push('\n');
        for note in &diag.notes {
            out.push_str("    note: ");
            out.push_str(note);
            out.push('\n');
        }
    }
    out
}

#[test]
fn pretty_output_for_mixed_sites() {
    let src = r#"typedef struct { char tag; int value; } item_t;

void fill(int *out, unsigned char *raw) {
    out = out + sizeof(item_t);
    raw = raw + sizeof(item_t);
    out -= offsetof(item_t, value);
    out = sizeof(int) + out;
}
"#;
    assert_snapshot!(render(src, "demo.c"), @r"
    demo.c:4:11: warning: bad_scaled_pointer_arithmetic: In pointer arithmetic right argument is calculated from a sizeof or offsetof expression
        note: path explored from `fill`
    demo.c:6:5: warning: bad_scaled_pointer_arithmetic: In pointer arithmetic right argument is calculated from a sizeof or offsetof expression
        note: path explored from `fill`
    demo.c:7:11: warning: bad_scaled_pointer_arithmetic: In pointer arithmetic left argument is calculated from a sizeof or offsetof expression
        note: path explored from `fill`
    ");
}

#[test]
fn clean_file_renders_nothing() {
    let src = "void f(char *p) { p = p + sizeof(long); }\n";
    assert_snapshot!(render(src, "clean.c"), @"");
}
