//! Path-sensitive detection of badly scaled pointer arithmetic in C.
//!
//! Sources are parsed with tree-sitter, lowered to a typed AST and explored
//! by a small symbolic execution engine. Values computed by `sizeof` and
//! `offsetof` carry a provenance tag along each path; the built-in checker
//! reports when such a value is added to or subtracted from a pointer whose
//! pointee is wider than one char.

#![allow(clippy::new_without_default)] // Registries are built explicitly
#![allow(clippy::too_many_arguments)] // Loop and call evaluation thread a lot of context

pub mod ast;
pub mod checker;
pub mod checkers;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod level;
pub mod parser;
pub mod report;
pub mod sema;
pub mod suppression;
pub mod telemetry;
pub mod types;

use anyhow::{Context, Result};
use std::path::Path;

use crate::checker::{CheckerRegistry, CheckerSettings};
use crate::diagnostics::Diagnostic;
use crate::engine::{AnalyzerOptions, analyze_translation_unit};
use crate::parser::parse_source;
use crate::suppression::SuppressionMap;

/// Engine orchestrates analysis: parse, lower, explore paths, report.
pub struct AnalysisEngine {
    registry: CheckerRegistry,
    settings: CheckerSettings,
    options: AnalyzerOptions,
}

impl AnalysisEngine {
    /// Create a new engine with default checker settings and options.
    pub fn new(registry: CheckerRegistry) -> Self {
        Self {
            registry,
            settings: CheckerSettings::default(),
            options: AnalyzerOptions::default(),
        }
    }

    /// Create a new engine with explicit settings (e.g. from config).
    pub fn new_with_settings(
        registry: CheckerRegistry,
        settings: CheckerSettings,
        options: AnalyzerOptions,
    ) -> Self {
        Self {
            registry,
            settings,
            options,
        }
    }

    pub fn registry(&self) -> &CheckerRegistry {
        &self.registry
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    /// Analyse a single in-memory source string and return diagnostics.
    pub fn analyze_source(&self, source: &str, file: Option<&str>) -> Result<Vec<Diagnostic>> {
        let tree = instrument_block!("parse", { parse_source(source) })?;

        let tu = instrument_block!("lower", { sema::lower(&tree, source, self.options.target) })?;
        let reporter = instrument_block!("analyze", {
            analyze_translation_unit(&tu, &self.registry, &self.options)
        });

        let suppressions = SuppressionMap::from_source(source);
        Ok(reporter.finish(&self.settings, &suppressions, file))
    }

    /// Read and analyse one file.
    pub fn analyze_file(&self, path: &Path) -> Result<Vec<Diagnostic>> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let display = path.display().to_string();
        self.analyze_source(&source, Some(&display))
            .with_context(|| format!("failed to analyse {display}"))
    }
}

/// Construct an `AnalysisEngine` with every built-in checker enabled.
pub fn create_default_engine() -> AnalysisEngine {
    AnalysisEngine::new(CheckerRegistry::default_checkers())
}
