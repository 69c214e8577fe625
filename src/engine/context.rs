use crate::ast::Expr;
use crate::diagnostics::Span;
use crate::engine::exploded::{ExplodedGraph, NodeId, ProgramPoint};
use crate::engine::state::StateRef;
use crate::engine::svals::{FrameId, SVal};
use crate::report::{BugReport, BugReporter};
use crate::trace_event;
use crate::types::TypeContext;

/// What a checker callback sees of the engine: the current path state, the
/// type layout, and the means to raise a finding on this path.
pub struct CheckerContext<'a> {
    pub(crate) graph: &'a mut ExplodedGraph,
    pub(crate) reporter: &'a mut BugReporter,
    pub(crate) types: &'a TypeContext,
    pub(crate) state: StateRef,
    pub(crate) frame: FrameId,
    pub(crate) point: ProgramPoint,
    pub(crate) pred: NodeId,
    pub(crate) span: Span,
    pub(crate) tag: &'static str,
    pub(crate) entry: &'a str,
}

impl CheckerContext<'_> {
    /// Value bound to `expr` on the current path; `Unknown` if unevaluated.
    pub fn sval(&self, expr: &Expr) -> SVal {
        self.state
            .expr_value(self.frame, expr.id)
            .cloned()
            .unwrap_or_else(SVal::unknown)
    }

    pub fn layout(&self) -> &TypeContext {
        self.types
    }

    pub fn state(&self) -> &StateRef {
        &self.state
    }

    pub fn entry_function(&self) -> &str {
        self.entry
    }

    /// Request an error node for the current state that does not end the
    /// path. Returns `None` when that node already exists, so a checker
    /// firing twice on the same path and state reports once.
    pub fn generate_non_fatal_error_node(&mut self) -> Option<NodeId> {
        self.graph.add_node(
            self.point.with_tag(self.tag),
            self.state.clone(),
            self.span,
            Some(self.pred),
        )
    }

    /// Hand `report` to the reporter, located at its error node.
    pub fn emit_report(&mut self, report: BugReport) {
        let span = self.graph.node(report.node).span;
        let report = report.with_note(format!("path explored from `{}`", self.entry));
        if self.reporter.emit(report, span) {
            trace_event!(debug, row = span.start.row, checker = self.tag, "report emitted");
        }
    }
}
