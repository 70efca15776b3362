//! Error types for the MIL networks library

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, MilError>;

/// Errors raised while configuring or running a MIL model.
#[derive(Debug, Error)]
pub enum MilError {
    /// A bag with zero instances has no pooled representation
    #[error("bag must contain at least one instance")]
    EmptyBag,

    /// Buffer or tensor dimensions disagree with the configured layer
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        actual: String,
    },

    /// Task mode string is not one of 'cls', 'surv' or 'cls+surv'
    #[error("unsupported task mode '{0}'")]
    UnsupportedTask(String),

    /// A typed forward pass was requested for a head the model does not carry
    #[error("model is configured for {configured} but {requested} was requested")]
    TaskMismatch {
        configured: &'static str,
        requested: &'static str,
    },

    /// Invalid model configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error while reading a configuration file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Array view construction failed in the numeric substrate
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl MilError {
    /// Builds a [`MilError::ShapeMismatch`] from anything printable.
    pub fn shape(
        context: &'static str,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        MilError::ShapeMismatch {
            context,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Fails with [`MilError::ShapeMismatch`] unless `actual == expected`.
pub(crate) fn ensure_len(context: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(MilError::shape(context, expected, actual));
    }
    Ok(())
}
