//! Path-sensitive symbolic execution over the typed AST.
//!
//! Every function definition is analysed as an entry point. Evaluation maps
//! one [`state::StateRef`] to the list of its successor states, forking at
//! branches on symbolic conditions, inlining calls to defined functions and
//! invoking the registered checkers before each binary operator.

pub mod context;
pub mod exec;
pub mod exploded;
pub mod state;
pub mod svals;

use crate::ast::TranslationUnit;
use crate::checker::CheckerRegistry;
use crate::report::BugReporter;
use crate::types::TargetLayout;

pub use exec::{ExprEngine, FunctionStats};
pub use svals::{Provenance, SVal};

/// Knobs of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerOptions {
    /// Maximum number of times a loop body is entered on one path.
    pub loop_bound: u32,
    /// Evaluation steps allowed per entry function before paths are dropped.
    pub max_steps: usize,
    /// Nesting depth up to which calls to defined functions are inlined.
    pub max_inline_depth: usize,
    /// Keep the sizeof/offsetof tag on the result of arithmetic.
    pub propagate_through_arithmetic: bool,
    pub target: TargetLayout,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            loop_bound: 2,
            max_steps: 20_000,
            max_inline_depth: 3,
            propagate_through_arithmetic: false,
            target: TargetLayout::default(),
        }
    }
}

/// Analyse every function definition of `tu` with the checkers of `registry`.
pub fn analyze_translation_unit(
    tu: &TranslationUnit,
    registry: &CheckerRegistry,
    options: &AnalyzerOptions,
) -> BugReporter {
    let mut reporter = BugReporter::new();
    {
        let mut engine = ExprEngine::new(tu, registry.checkers(), options, &mut reporter);
        for function in tu.functions.iter().filter(|f| f.body.is_some()) {
            let _stats = engine.analyze_function(function);
            crate::trace_event!(
                debug,
                function = %function.name,
                nodes = _stats.nodes,
                paths = _stats.paths,
                budget_exhausted = _stats.budget_exhausted,
                "analysed entry function"
            );
        }
    }
    reporter
}
