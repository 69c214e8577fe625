use anyhow::Error as AnyhowError;
use thiserror::Error;

use crate::types::LayoutError;

/// Result alias for errors emitted by the analyzer internals.
pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

/// Structured error type for analyzer subsystems.
///
/// Findings are never errors; these variants only describe failures to read,
/// parse or configure an analysis run.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse failure: {0}")]
    Parse(String),

    #[error("layout query failed: {0}")]
    Layout(#[from] LayoutError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl AnalyzerError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<AnyhowError> for AnalyzerError {
    fn from(err: AnyhowError) -> Self {
        AnalyzerError::other(format!("{err:#}"))
    }
}

/// Mirrors `anyhow::bail!` but returns an [`AnalyzerError`].
#[macro_export]
macro_rules! analyzer_bail {
    ($($arg:tt)*) => {
        return Err($crate::error::AnalyzerError::other(format!($($arg)*)));
    };
}

/// Mirrors `anyhow::ensure!`.
#[macro_export]
macro_rules! analyzer_ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::analyzer_bail!($($arg)*);
        }
    };
}
