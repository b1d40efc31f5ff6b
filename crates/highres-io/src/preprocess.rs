//! End-to-end intensity preprocessing of a single-modality volume.

use std::path::Path;

use crate::error::Result;
use crate::histogram::{mean_plus_mask, HistogramModel, HistogramStandardizer, MappingKind, DEFAULT_CUTOFF};
use crate::nifti_io::{read_volume, write_volume, Volume};

/// Options for [`preprocess_with`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessOptions {
    /// Lower and upper landmark percentiles, as fractions
    pub cutoff: (f64, f64),
    /// Modality whose landmarks are read from the model file
    pub modality: String,
    pub mapping: MappingKind,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            cutoff: DEFAULT_CUTOFF,
            modality: "Modality0".to_string(),
            mapping: MappingKind::default(),
        }
    }
}

/// Mask and standardize one volume in memory.
pub fn standardize_volume(
    volume: &Volume,
    model: &HistogramModel,
    options: &PreprocessOptions,
) -> Result<Volume> {
    let standardizer =
        HistogramStandardizer::from_model(model, &options.modality, options.cutoff, options.mapping)?;
    let mask = mean_plus_mask(&volume.data);
    tracing::debug!(
        "Foreground mask covers {} of {} voxels",
        mask.iter().filter(|&&m| m).count(),
        mask.len()
    );
    volume.with_data(standardizer.standardize(&volume.data, &mask)?)
}

/// Read `input`, standardize it against the landmarks in `model_path` and
/// write the result to `output` with the input's header.
pub fn preprocess<P, Q, R>(input: P, model_path: Q, output: R, cutoff: (f64, f64)) -> Result<Volume>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
{
    let options = PreprocessOptions {
        cutoff,
        ..PreprocessOptions::default()
    };
    preprocess_with(input, model_path, output, &options)
}

pub fn preprocess_with<P, Q, R>(
    input: P,
    model_path: Q,
    output: R,
    options: &PreprocessOptions,
) -> Result<Volume>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
{
    let volume = read_volume(&input)?;
    let model = HistogramModel::load(model_path)?;
    let standardized = standardize_volume(&volume, &model, options)?;
    write_volume(&output, &standardized)?;
    tracing::info!(
        "Standardized {} -> {} ({} mapping, cutoff {:?})",
        input.as_ref().display(),
        output.as_ref().display(),
        options.mapping,
        options.cutoff
    );
    Ok(standardized)
}
