use thiserror::Error;

/// Errors raised while reading, writing or standardizing volumes.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The volume does not reduce to three spatial axes.
    #[error("Unsupported volume shape {0:?}: expected three spatial axes")]
    UnsupportedShape(Vec<usize>),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Histogram model error: {0}")]
    HistogramModel(String),

    #[error("Mask selects no voxels")]
    EmptyMask,

    #[error("Tensor data error: {0}")]
    TensorData(String),
}

pub type Result<T> = std::result::Result<T, IoError>;
