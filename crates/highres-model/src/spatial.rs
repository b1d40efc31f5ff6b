//! Spatial dimensionality of a network instance.
//!
//! Every block runs on 5D tensors `[batch, channels, depth, height, width]`.
//! Planar networks keep a singleton depth axis: their kernels are
//! `[1, k, k]`, their dilation is `[1, d, d]` and the depth axis is never
//! padded, so a 2D network is exactly a Conv2d stack in 3D clothing.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::HighResNetError;

/// Number of spatial axes processed by a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum Dimensions {
    /// Planar images `[batch, channels, height, width]`.
    Two,
    /// Volumes `[batch, channels, depth, height, width]`.
    Three,
}

impl Dimensions {
    /// Number of spatial axes.
    pub fn rank(self) -> usize {
        match self {
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Axes of the internal 5D tensor that carry spatial extent.
    pub fn padded_axes(self) -> Range<usize> {
        (5 - self.rank())..5
    }

    /// Kernel extent for a cubic (or square) kernel of side `size`.
    pub fn kernel(self, size: usize) -> [usize; 3] {
        match self {
            Self::Two => [1, size, size],
            Self::Three => [size, size, size],
        }
    }

    /// Dilation for an isotropic dilation factor.
    pub fn dilation(self, factor: usize) -> [usize; 3] {
        match self {
            Self::Two => [1, factor, factor],
            Self::Three => [factor, factor, factor],
        }
    }

    /// Shape of a convolution kernel as exposed to callers.
    ///
    /// Planar kernels drop the singleton depth axis: `[out, in, k, k]`.
    pub fn kernel_shape(self, in_channels: usize, out_channels: usize, size: usize) -> Vec<usize> {
        let mut shape = vec![out_channels, in_channels];
        shape.extend(std::iter::repeat(size).take(self.rank()));
        shape
    }
}

impl TryFrom<usize> for Dimensions {
    type Error = HighResNetError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            other => Err(HighResNetError::invalid_configuration(format!(
                "dimensions must be 2 or 3, got {other}"
            ))),
        }
    }
}

impl From<Dimensions> for usize {
    fn from(value: Dimensions) -> Self {
        value.rank()
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}D", self.rank())
    }
}
