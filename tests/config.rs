use scaled_ptr_check::AnalysisEngine;
use scaled_ptr_check::checker::{CheckerRegistry, CheckerSettings};
use scaled_ptr_check::config;
use scaled_ptr_check::engine::AnalyzerOptions;
use scaled_ptr_check::level::Level;
use std::path::Path;

const SRC: &str = "void f(int *p) {\n  unsigned long n = sizeof(int) + 0;\n  p = p + sizeof(int);\n  p = p + n;\n}\n";

fn engine_from(cfg_path: &Path) -> AnalysisEngine {
    let cfg = config::load_config_file(cfg_path).expect("config should load");
    let options = cfg.apply_to(AnalyzerOptions::default()).expect("valid options");

    let empty: Vec<String> = Vec::new();
    let registry =
        CheckerRegistry::default_checkers_filtered(&empty, &empty, &cfg.checkers.disabled, &options)
            .expect("registry");
    let settings = CheckerSettings::default()
        .with_config_levels(cfg.checkers.levels)
        .disable(cfg.checkers.disabled);
    AnalysisEngine::new_with_settings(registry, settings, options)
}

#[test]
fn config_can_promote_checker_to_error() {
    let cfg_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/config/error_level/scaled-ptr-check.toml");
    let diags = engine_from(&cfg_path)
        .analyze_source(SRC, None)
        .expect("analysis should succeed");

    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].level, Level::Error);
}

#[test]
fn config_can_disable_checker() {
    let cfg_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/config/disabled/scaled-ptr-check.toml");
    let engine = engine_from(&cfg_path);
    assert!(engine.registry().is_empty());

    let diags = engine.analyze_source(SRC, None).expect("analysis should succeed");
    assert!(diags.is_empty());
}

#[test]
fn config_engine_section_reaches_the_engine() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join(config::DEFAULT_CONFIG_FILE_NAME),
        "[engine]\npropagate_through_arithmetic = true\nloop_bound = 5\n",
    )
    .expect("write config");

    let nested = dir.path().join("src");
    std::fs::create_dir_all(&nested).expect("mkdir");
    let (path, _) = config::load_config(None, &nested)
        .expect("load")
        .expect("config discovered");

    let engine = engine_from(&path);
    assert_eq!(engine.options().loop_bound, 5);
    let diags = engine.analyze_source(SRC, None).expect("analysis should succeed");
    assert_eq!(diags.len(), 2, "{diags:#?}");
}

#[test]
fn unknown_disabled_checker_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(config::DEFAULT_CONFIG_FILE_NAME);
    std::fs::write(&path, "[checkers]\ndisabled = [\"no_such_checker\"]\n").expect("write config");

    let cfg = config::load_config_file(&path).expect("config should load");
    let err = CheckerRegistry::default_checkers_filtered(
        &[],
        &[],
        &cfg.checkers.disabled,
        &AnalyzerOptions::default(),
    )
    .err()
    .expect("unknown checker must fail");
    assert!(err.to_string().contains("no_such_checker"));
}

#[test]
fn malformed_config_reports_the_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(config::DEFAULT_CONFIG_FILE_NAME);
    std::fs::write(&path, "[checkers\n").expect("write config");

    let err = config::load_config_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("failed to parse config file"));
}
