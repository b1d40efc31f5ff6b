pub mod adapter;
pub mod error;
pub mod histogram;
pub mod nifti_io;
pub mod preprocess;

pub use adapter::{label_map, tensor_to_array, volumes_to_tensor};
pub use error::{IoError, Result};
pub use histogram::{mean_plus_mask, HistogramModel, HistogramStandardizer, MappingKind, DEFAULT_CUTOFF};
pub use nifti_io::{read_volume, write_volume, Volume};
pub use preprocess::{preprocess, preprocess_with, standardize_volume, PreprocessOptions};
