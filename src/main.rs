use clap::Parser;
use itertools::Itertools;
use scaled_ptr_check::AnalysisEngine;
use scaled_ptr_check::checker::{CheckerRegistry, CheckerSettings};
use scaled_ptr_check::cli::{Args, CheckArgs, Command, OutputFormat};
use scaled_ptr_check::config;
use scaled_ptr_check::diagnostics::Diagnostic;
use scaled_ptr_check::engine::AnalyzerOptions;
use scaled_ptr_check::level::Level;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use walkdir::WalkDir;

fn main() -> ExitCode {
    scaled_ptr_check::telemetry::init_tracing();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    match args.command {
        Some(Command::ListCheckers) => {
            list_checkers();
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Explain { checker }) => {
            explain_checker(&checker)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Check(check)) => check_command(check),
        None => check_command(args.check),
    }
}

fn list_checkers() {
    let registry = CheckerRegistry::default_checkers();
    for d in registry.descriptors().sorted_by_key(|d| d.name) {
        println!("{}\t{}\t{}", d.name, d.category.as_str(), d.description);
    }
}

fn explain_checker(name: &str) -> anyhow::Result<()> {
    let Some(d) = CheckerRegistry::default_checkers().find_descriptor(name) else {
        anyhow::bail!("unknown checker: {name}");
    };

    println!("name: {}", d.name);
    println!("category: {}", d.category.as_str());
    println!("description: {}", d.description);
    println!();
    println!("{}", d.explanation);
    Ok(())
}

fn check_command(args: CheckArgs) -> anyhow::Result<ExitCode> {
    let start_dir = infer_start_dir(&args)?;
    let loaded_cfg = config::load_config(args.config.as_deref(), &start_dir)?;

    let mut options = AnalyzerOptions::default();
    let (disabled, settings) = match loaded_cfg.as_ref() {
        Some((_path, cfg)) => {
            options = cfg.apply_to(options)?;
            (
                cfg.checkers.disabled.clone(),
                CheckerSettings::default()
                    .with_config_levels(cfg.checkers.levels.clone())
                    .disable(cfg.checkers.disabled.clone()),
            )
        }
        None => (Vec::new(), CheckerSettings::default()),
    };

    // CLI flags take precedence over config
    if let Some(n) = args.max_steps {
        anyhow::ensure!(n > 0, "--max-steps must be positive");
        options.max_steps = n;
    }
    if let Some(n) = args.loop_bound {
        options.loop_bound = n;
    }
    options.propagate_through_arithmetic |= args.propagate_through_arithmetic;

    let registry =
        CheckerRegistry::default_checkers_filtered(&args.only, &args.skip, &disabled, &options)?;
    let engine = AnalysisEngine::new_with_settings(registry, settings, options);

    let diagnostics = if args.paths.is_empty() {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        engine.analyze_source(&source, None)?
    } else {
        let mut all = Vec::new();
        for path in collect_c_files(&args.paths)? {
            all.extend(engine.analyze_file(&path)?);
        }
        all
    };

    let has_error = diagnostics.iter().any(|d| d.level == Level::Error);

    match args.format {
        OutputFormat::Json => {
            let out: Vec<JsonDiagnostic> = diagnostics.iter().map(JsonDiagnostic::from).collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Pretty => {
            for diag in &diagnostics {
                println!("{}", diag.render());
                for note in &diag.notes {
                    println!("    note: {note}");
                }
            }
            let files = diagnostics.iter().filter_map(|d| d.file.as_deref()).unique().count();
            println!("{} diagnostics in {} files", diagnostics.len(), files);
        }
        OutputFormat::Github => {
            for diag in &diagnostics {
                print_github(diag, args.deny_warnings);
            }
        }
    }

    if has_error || (args.deny_warnings && !diagnostics.is_empty()) {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

#[derive(Debug, Serialize)]
struct JsonDiagnostic {
    file: String,
    row: usize,
    column: usize,
    level: String,
    checker: String,
    bug_type: String,
    category: String,
    message: String,
    notes: Vec<String>,
}

impl From<&Diagnostic> for JsonDiagnostic {
    fn from(d: &Diagnostic) -> Self {
        Self {
            file: d.file.clone().unwrap_or_else(|| "stdin".to_string()),
            row: d.span.start.row,
            column: d.span.start.column,
            level: d.level.as_str().to_string(),
            checker: d.checker.name.to_string(),
            bug_type: d.bug_type.to_string(),
            category: d.category.to_string(),
            message: d.message.clone(),
            notes: d.notes.clone(),
        }
    }
}

fn print_github(diag: &Diagnostic, deny_warnings: bool) {
    let kind = if diag.level == Level::Error || (deny_warnings && diag.level == Level::Warn) {
        "error"
    } else {
        "warning"
    };
    let file = diag.file.as_deref().unwrap_or("stdin");
    println!(
        "::{} file={},line={},col={},title={}::{}",
        kind,
        github_escape(file),
        diag.span.start.row,
        diag.span.start.column,
        diag.checker.name,
        github_escape(&diag.message)
    );
}

fn github_escape(s: &str) -> String {
    s.replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn is_c_source(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("c" | "h"))
}

fn collect_c_files(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in paths {
        if !path.is_dir() {
            anyhow::ensure!(path.exists(), "no such file: {}", path.display());
            out.push(path.clone());
            continue;
        }
        let walker = WalkDir::new(path)
            .into_iter()
            .filter_entry(|e| !should_skip_dir(e.path()));
        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_file() && is_c_source(entry.path()) {
                out.push(entry.into_path());
            }
        }
    }

    Ok(out.into_iter().sorted().dedup().collect())
}

fn should_skip_dir(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
        return false;
    };

    path.is_dir() && matches!(name, ".git" | "target" | "build")
}

fn infer_start_dir(args: &CheckArgs) -> anyhow::Result<PathBuf> {
    let base = match args.paths.first() {
        Some(p) => p.clone(),
        None => std::env::current_dir()?,
    };

    let base = if base.is_file() {
        base.parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        base
    };

    Ok(base)
}
