//! Error types for route extraction
//!
//! Only conditions that make the whole extraction meaningless are errors.
//! A bad file or a malformed registration becomes an [`ExtractWarning`] and
//! extraction carries on.

use std::fmt;
use std::path::PathBuf;

/// Errors that abort an extraction
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Source root missing or unreadable
    #[error("source root not readable: {path}: {reason}")]
    Root {
        /// Configured root
        path: PathBuf,
        /// Underlying cause
        reason: String,
    },

    /// Grammar could not be loaded into the parser
    #[error("parser init failed: {0}")]
    ParserInit(String),

    /// No registered extractor handles any file under the root
    #[error("no extractor handles sources under {0}")]
    NoSources(PathBuf),
}

impl ExtractError {
    /// Create root error
    pub fn root(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Root {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for extraction
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Non-fatal problem found while extracting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractWarning {
    /// File the problem was found in
    pub file: PathBuf,
    /// 1-based line, `0` when the whole file is affected
    pub line: usize,
    /// What was skipped and why
    pub message: String,
}

impl ExtractWarning {
    /// Warning at a line
    #[must_use]
    pub fn new(file: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ExtractWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file.display(), self.line, self.message)
    }
}
