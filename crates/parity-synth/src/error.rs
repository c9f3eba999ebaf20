//! Error types for synthesis

use parity_model::{FieldPath, ModelError};

/// Errors raised while synthesizing or corrupting request values
#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    /// Mutation target is not present in the value tree
    #[error("mutation target not found: {0}")]
    TargetNotFound(FieldPath),

    /// Mutation target has a type the operator cannot corrupt
    #[error("cannot apply {op} to {path}: {reason}")]
    Inapplicable {
        op: &'static str,
        path: FieldPath,
        reason: String,
    },

    /// Model-level failure (path addressing)
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl SynthError {
    /// Create inapplicable error
    pub fn inapplicable(op: &'static str, path: &FieldPath, reason: impl Into<String>) -> Self {
        Self::Inapplicable {
            op,
            path: path.clone(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for synthesis
pub type SynthResult<T> = Result<T, SynthError>;
