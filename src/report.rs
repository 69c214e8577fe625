//! Bug types, bug reports and the reporter that turns them into diagnostics.

use std::collections::HashSet;

use crate::checker::{CheckerDescriptor, CheckerSettings};
use crate::diagnostics::{Diagnostic, Span};
use crate::engine::exploded::NodeId;
use crate::suppression::SuppressionMap;

/// A kind of bug a checker can report. Checkers keep one `static` per bug
/// type; the reporter deduplicates by its address.
#[derive(Debug)]
pub struct BugType {
    pub checker: &'static CheckerDescriptor,
    pub name: &'static str,
    pub category: &'static str,
}

/// One finding attached to an error node of the exploded graph.
#[derive(Debug, Clone)]
pub struct BugReport {
    pub bug_type: &'static BugType,
    pub message: String,
    pub node: NodeId,
    pub notes: Vec<String>,
}

impl BugReport {
    pub fn new(bug_type: &'static BugType, message: impl Into<String>, node: NodeId) -> Self {
        Self {
            bug_type,
            message: message.into(),
            node,
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

#[derive(Debug, Clone)]
struct PendingReport {
    bug_type: &'static BugType,
    span: Span,
    message: String,
    notes: Vec<String>,
}

/// Collects reports for one file across all analysed entry points.
#[derive(Debug, Default)]
pub struct BugReporter {
    reports: Vec<PendingReport>,
    seen: HashSet<(usize, Span, String)>,
}

impl BugReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `report` located at `span`. Returns `false` if an equivalent
    /// report (same bug type, location and message) was already accepted.
    pub fn emit(&mut self, report: BugReport, span: Span) -> bool {
        let identity = std::ptr::from_ref(report.bug_type) as usize;
        if !self
            .seen
            .insert((identity, span, report.message.clone()))
        {
            return false;
        }
        self.reports.push(PendingReport {
            bug_type: report.bug_type,
            span,
            message: report.message,
            notes: report.notes,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Apply configured levels and suppression comments, then sort.
    pub fn finish(
        self,
        settings: &CheckerSettings,
        suppressions: &SuppressionMap,
        file: Option<&str>,
    ) -> Vec<Diagnostic> {
        let mut diagnostics: Vec<Diagnostic> = self
            .reports
            .into_iter()
            .filter_map(|report| {
                let checker = report.bug_type.checker;
                let level = suppressions.level_for(
                    checker.name,
                    checker.category.as_str(),
                    report.span.start.row,
                    settings.level_for(checker.name),
                );
                level.is_reported().then(|| Diagnostic {
                    checker,
                    bug_type: report.bug_type.name,
                    category: report.bug_type.category,
                    level,
                    file: file.map(str::to_string),
                    span: report.span,
                    message: report.message,
                    notes: report.notes,
                })
            })
            .collect();

        diagnostics.sort_by(|a, b| {
            (a.span, a.checker.name, &a.message).cmp(&(b.span, b.checker.name, &b.message))
        });
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::CheckerCategory;
    use crate::diagnostics::Position;
    use crate::level::Level;

    static TEST_CHECKER: CheckerDescriptor = CheckerDescriptor {
        name: "test_checker",
        category: CheckerCategory::Suspicious,
        description: "test",
        explanation: "test",
    };

    static TEST_BUG: BugType = BugType {
        checker: &TEST_CHECKER,
        name: "Test bug",
        category: "Testing",
    };

    fn span_at(row: usize) -> Span {
        Span {
            start: Position { row, column: 1 },
            end: Position { row, column: 5 },
        }
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut reporter = BugReporter::new();
        assert!(reporter.emit(BugReport::new(&TEST_BUG, "msg", NodeId(0)), span_at(1)));
        assert!(!reporter.emit(BugReport::new(&TEST_BUG, "msg", NodeId(7)), span_at(1)));
        assert!(reporter.emit(BugReport::new(&TEST_BUG, "other", NodeId(7)), span_at(1)));
        assert_eq!(reporter.len(), 2);
    }

    #[test]
    fn finish_applies_levels_and_sorts() {
        let mut reporter = BugReporter::new();
        reporter.emit(BugReport::new(&TEST_BUG, "second", NodeId(1)), span_at(9));
        reporter.emit(BugReport::new(&TEST_BUG, "first", NodeId(0)), span_at(2));

        let settings = CheckerSettings::default().with_level("test_checker", Level::Error);
        let diags = reporter.finish(&settings, &SuppressionMap::default(), Some("a.c"));
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].message, "first");
        assert_eq!(diags[0].level, Level::Error);
        assert_eq!(diags[1].file.as_deref(), Some("a.c"));
    }

    #[test]
    fn allow_level_drops_findings() {
        let mut reporter = BugReporter::new();
        reporter.emit(BugReport::new(&TEST_BUG, "msg", NodeId(0)), span_at(1));
        let settings = CheckerSettings::default().disable(["test_checker".to_string()]);
        assert!(reporter.finish(&settings, &SuppressionMap::default(), None).is_empty());
    }
}
