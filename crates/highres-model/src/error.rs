//! Error types for network construction and parameter I/O.
//!
//! Construction errors are raised before any block is allocated, so a
//! failing `init` never hands back a partially built network.

use thiserror::Error;

/// Main error type for HighResNet operations.
#[derive(Error, Debug)]
pub enum HighResNetError {
    /// Invalid descriptor: unknown padding mode, conflicting normalization
    /// flags, unsupported dimensionality, channels that cannot be padded.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Tensor shapes disagree where they must match.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A named tensor does not correspond to any parameter of the network.
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// An external checkpoint entry could not be interpreted.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

/// Result type for HighResNet operations.
pub type Result<T> = std::result::Result<T, HighResNetError>;

impl HighResNetError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a shape mismatch error.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create a checkpoint error.
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }
}
