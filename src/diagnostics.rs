use crate::checker::CheckerDescriptor;
use crate::level::Level;
use serde::Serialize;
use std::fmt;
use tree_sitter::Range;

/// A single finding produced by an analysis run.
#[derive(Debug, Clone)]
#[must_use]
pub struct Diagnostic {
    pub checker: &'static CheckerDescriptor,
    /// Bug type name, e.g. "Badly scaled pointer arithmetic".
    pub bug_type: &'static str,
    /// Bug category, e.g. "Suspicious operation".
    pub category: &'static str,
    pub level: Level,
    pub file: Option<String>,
    pub span: Span,
    pub message: String,
    /// Path notes, outermost first.
    pub notes: Vec<String>,
}

/// Span in a C source file (1-based row/column positions).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

/// Single position in a C source file (1-based row/column).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Span {
    /// Construct a `Span` from a tree-sitter range, converting to 1-based positions.
    #[must_use]
    pub fn from_range(range: Range) -> Self {
        Self {
            start: Position {
                row: range.start_point.row + 1,
                column: range.start_point.column + 1,
            },
            end: Position {
                row: range.end_point.row + 1,
                column: range.end_point.column + 1,
            },
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.column)
    }
}

impl Diagnostic {
    /// `file:row:col: level: checker: message`, the pretty output line.
    pub fn render(&self) -> String {
        format!(
            "{}:{}: {}: {}: {}",
            self.file.as_deref().unwrap_or("<stdin>"),
            self.span.start,
            self.level,
            self.checker.name,
            self.message
        )
    }
}
