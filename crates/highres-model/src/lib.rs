//! HighResNet: dilated residual networks for volumetric and planar segmentation.

pub mod checkpoint;
pub mod conv_block;
pub mod dilation;
pub mod dropout;
pub mod error;
pub mod network;
pub mod padding;
pub mod params;
pub mod residual;
pub mod schedule;
pub mod spatial;

pub use checkpoint::{convert_external_tensor, map_external_name};
pub use conv_block::{ConvolutionalBlock, ConvolutionalBlockConfig, Normalization};
pub use dilation::{DilationBlock, DilationBlockConfig};
pub use dropout::ChannelDropout;
pub use error::{HighResNetError, Result};
pub use network::{presets, HighResNet, HighResNetConfig, ModelSummary, DROPOUT_STAGE_CHANNELS};
pub use padding::{pad, PaddingMode, SpatialPad};
pub use params::{NamedTensor, ParameterStatistics, TensorKind};
pub use residual::{ResidualBlock, ResidualBlockConfig, ResidualType};
pub use schedule::{receptive_field, ChannelSchedule, StageWidths};
pub use spatial::Dimensions;
