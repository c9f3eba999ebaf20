//! Error types for the parity model
//!
//! Model errors are raised while addressing or rewriting value trees and
//! while planning variant patches. They never cross a process boundary.

/// Errors raised by model-level operations
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Field path could not be parsed from its string form
    #[error("invalid field path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Field path does not address a value in the tree
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// Variant references a column the row does not have
    #[error("variant '{label}' references unknown column '{column}'")]
    UnknownColumn { label: String, column: String },

    /// Variant value cannot be computed from the current row
    #[error("variant '{label}' cannot compute column '{column}': {reason}")]
    UncomputableValue {
        label: String,
        column: String,
        reason: String,
    },

    /// HTTP method string not recognized
    #[error("unsupported http method: {0}")]
    UnsupportedMethod(String),
}

impl ModelError {
    /// Create invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create unknown column error
    pub fn unknown_column(label: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            label: label.into(),
            column: column.into(),
        }
    }
}

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_path_display() {
        let err = ModelError::invalid_path("a..b", "empty segment");
        assert_eq!(err.to_string(), "invalid field path 'a..b': empty segment");
    }

    #[test]
    fn unknown_column_display() {
        let err = ModelError::unknown_column("paid", "paid_at");
        assert!(err.to_string().contains("paid_at"));
    }
}
