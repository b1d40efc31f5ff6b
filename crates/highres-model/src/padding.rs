//! Spatial padding policies.
//!
//! Padding is applied symmetrically to spatial axes only; the batch and
//! channel axes are never touched. Each mode is a pure geometric transform
//! built from `narrow`, `flip` and `cat`, so it works on any burn backend.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::HighResNetError;
use crate::spatial::Dimensions;

/// How values outside the input are synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingMode {
    /// Mirror about the edge sample, excluding the edge itself.
    Reflect,
    /// Repeat the edge sample.
    Replicate,
    /// Zeros.
    #[default]
    #[serde(alias = "zero")]
    Constant,
}

impl PaddingMode {
    /// Largest pad amount this mode supports for an axis of `extent` samples.
    pub fn max_amount(self, extent: usize) -> Option<usize> {
        match self {
            Self::Reflect => Some(extent.saturating_sub(1)),
            Self::Replicate | Self::Constant => None,
        }
    }
}

impl FromStr for PaddingMode {
    type Err = HighResNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reflect" => Ok(Self::Reflect),
            "replicate" => Ok(Self::Replicate),
            "constant" | "zero" => Ok(Self::Constant),
            other => Err(HighResNetError::invalid_configuration(format!(
                "unknown padding mode '{other}' (expected reflect, replicate or constant)"
            ))),
        }
    }
}

impl fmt::Display for PaddingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reflect => "reflect",
            Self::Replicate => "replicate",
            Self::Constant => "constant",
        };
        f.write_str(name)
    }
}

/// Pad every spatial axis (all axes after the channel axis) by `amount`.
///
/// # Panics
///
/// With [`PaddingMode::Reflect`], if `amount` is not smaller than the extent
/// of a padded axis.
pub fn pad<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    amount: usize,
    mode: PaddingMode,
) -> Tensor<B, D> {
    pad_axes(tensor, amount, mode, 2..D)
}

/// Pad the given axes by `amount` on both faces.
pub fn pad_axes<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    amount: usize,
    mode: PaddingMode,
    axes: Range<usize>,
) -> Tensor<B, D> {
    if amount == 0 {
        return tensor;
    }
    axes.fold(tensor, |acc, axis| pad_axis(acc, axis, amount, mode))
}

fn pad_axis<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    axis: usize,
    amount: usize,
    mode: PaddingMode,
) -> Tensor<B, D> {
    let extent = tensor.dims()[axis];
    let (before, after) = match mode {
        PaddingMode::Constant => {
            let mut dims = tensor.dims();
            dims[axis] = amount;
            let zeros = Tensor::<B, D>::zeros(dims, &tensor.device());
            (zeros.clone(), zeros)
        }
        PaddingMode::Replicate => {
            let first = tensor.clone().narrow(axis, 0, 1);
            let last = tensor.clone().narrow(axis, extent - 1, 1);
            (
                Tensor::cat(vec![first; amount], axis),
                Tensor::cat(vec![last; amount], axis),
            )
        }
        PaddingMode::Reflect => {
            assert!(
                amount < extent,
                "reflect padding of {amount} needs an axis longer than {amount}, got {extent}"
            );
            let before = tensor.clone().narrow(axis, 1, amount).flip([axis as isize]);
            let after = tensor
                .clone()
                .narrow(axis, extent - 1 - amount, amount)
                .flip([axis as isize]);
            (before, after)
        }
    };
    Tensor::cat(vec![before, tensor, after], axis)
}

/// Padding step of a convolutional block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpatialPad {
    pub amount: usize,
    pub mode: PaddingMode,
    pub dimensions: Dimensions,
}

impl SpatialPad {
    pub fn new(amount: usize, mode: PaddingMode, dimensions: Dimensions) -> Self {
        Self {
            amount,
            mode,
            dimensions,
        }
    }

    /// Pad the spatial axes of a 5D block tensor.
    ///
    /// Planar networks leave the singleton depth axis alone.
    pub fn forward<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        pad_axes(x, self.amount, self.mode, self.dimensions.padded_axes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn ramp(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 3> {
        // [1, 1, 4] = [0, 1, 2, 3]
        Tensor::<TestBackend, 1>::from_floats([0.0, 1.0, 2.0, 3.0], device).reshape([1, 1, 4])
    }

    fn values(t: Tensor<TestBackend, 3>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_constant_padding() {
        let device = Default::default();
        let out = pad(ramp(&device), 2, PaddingMode::Constant);
        assert_eq!(values(out), vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);
    }

    #[test]
    fn test_replicate_padding() {
        let device = Default::default();
        let out = pad(ramp(&device), 2, PaddingMode::Replicate);
        assert_eq!(values(out), vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_reflect_padding() {
        let device = Default::default();
        let out = pad(ramp(&device), 2, PaddingMode::Reflect);
        assert_eq!(values(out), vec![2.0, 1.0, 0.0, 1.0, 2.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    #[should_panic]
    fn test_reflect_padding_too_large() {
        let device = Default::default();
        let _ = pad(ramp(&device), 4, PaddingMode::Reflect);
    }

    #[test]
    fn test_all_faces_padded_in_3d() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 5>::ones([2, 3, 4, 5, 6], &device);
        let pad = SpatialPad::new(2, PaddingMode::Replicate, Dimensions::Three);
        assert_eq!(pad.forward(x).dims(), [2, 3, 8, 9, 10]);
    }

    #[test]
    fn test_planar_pad_skips_depth() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 5>::ones([1, 2, 1, 5, 6], &device);
        let pad = SpatialPad::new(1, PaddingMode::Reflect, Dimensions::Two);
        assert_eq!(pad.forward(x).dims(), [1, 2, 1, 7, 8]);
    }

    #[test]
    fn test_constant_pad_keeps_interior() {
        let device = Default::default();
        let data = TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 1, 2, 2]);
        let x = Tensor::<TestBackend, 4>::from_data(data, &device);
        let out = pad(x, 1, PaddingMode::Constant);
        assert_eq!(out.dims(), [1, 1, 4, 4]);
        let sum = out.sum().into_scalar();
        assert_eq!(sum, 10.0);
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("reflect".parse::<PaddingMode>().unwrap(), PaddingMode::Reflect);
        assert_eq!("zero".parse::<PaddingMode>().unwrap(), PaddingMode::Constant);
        assert!(matches!(
            "unsupported".parse::<PaddingMode>(),
            Err(HighResNetError::InvalidConfiguration(_))
        ));
        assert!(serde_json::from_str::<PaddingMode>("\"unsupported\"").is_err());
    }
}
