//! Residual block: a stack of convolutional blocks with a skip connection.
//!
//! When the block widens the channel axis the skip path is reconciled in one
//! of two ways (He et al., "Deep Residual Learning", options A and B):
//!
//! - [`ResidualType::Pad`]: identity with extra zero channels appended;
//! - [`ResidualType::Project`]: a bias-free 1×1 convolution.

use burn::module::Ignored;
use burn::nn::conv::{Conv3d, Conv3dConfig};
use burn::nn::PaddingConfig3d;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::conv_block::{ConvolutionalBlock, ConvolutionalBlockConfig, Normalization};
use crate::error::{self, HighResNetError};
use crate::padding::PaddingMode;
use crate::params::{export_kernel, join, kernel_shape, NamedTensor, TensorKind, TensorSource};
use crate::spatial::Dimensions;

/// How the skip path handles a change in channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidualType {
    #[default]
    Pad,
    Project,
}

/// Configuration for [`ResidualBlock`].
#[derive(Config, Debug, PartialEq)]
pub struct ResidualBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Convolutional blocks in the residual path
    #[config(default = "2")]
    pub num_layers: usize,
    #[config(default = "1")]
    pub dilation: usize,
    /// Add the skip connection
    #[config(default = "true")]
    pub residual: bool,
    #[config(default = "ResidualType::Pad")]
    pub residual_type: ResidualType,
    #[config(default = "Normalization::Batch")]
    pub normalization: Normalization,
    #[config(default = "PaddingMode::Constant")]
    pub padding_mode: PaddingMode,
    #[config(default = "Dimensions::Three")]
    pub dimensions: Dimensions,
}

impl ResidualBlockConfig {
    pub fn validate(&self) -> error::Result<()> {
        if self.num_layers == 0 {
            return Err(HighResNetError::invalid_configuration(
                "a residual block needs at least one convolutional layer",
            ));
        }
        if self.residual
            && self.residual_type == ResidualType::Pad
            && self.out_channels < self.in_channels
        {
            return Err(HighResNetError::invalid_configuration(format!(
                "cannot zero-pad a {}-channel skip path down to {} channels",
                self.in_channels, self.out_channels
            )));
        }
        Ok(())
    }

    /// Configurations of the owned convolutional blocks, first in→out then out→out.
    pub fn layer_configs(&self) -> Vec<ConvolutionalBlockConfig> {
        (0..self.num_layers)
            .map(|idx| {
                let in_channels = if idx == 0 {
                    self.in_channels
                } else {
                    self.out_channels
                };
                ConvolutionalBlockConfig::new(in_channels, self.out_channels)
                    .with_dilation(self.dilation)
                    .with_dimensions(self.dimensions)
                    .with_padding_mode(self.padding_mode)
                    .with_normalization(self.normalization)
                    .with_preactivation(true)
            })
            .collect()
    }

    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<ResidualBlock<B>> {
        self.validate()?;

        let conv_blocks = self
            .layer_configs()
            .iter()
            .map(|config| config.init(device))
            .collect::<error::Result<Vec<_>>>()?;

        let projection = (self.residual
            && self.residual_type == ResidualType::Project
            && self.in_channels != self.out_channels)
            .then(|| {
                Conv3dConfig::new(
                    [self.in_channels, self.out_channels],
                    self.dimensions.kernel(1),
                )
                .with_dilation(self.dimensions.dilation(self.dilation))
                .with_padding(PaddingConfig3d::Valid)
                .with_bias(false)
                .init(device)
            });

        Ok(ResidualBlock {
            conv_blocks,
            projection,
            residual: self.residual,
            residual_type: Ignored(self.residual_type),
            in_channels: self.in_channels,
            out_channels: self.out_channels,
            dimensions: Ignored(self.dimensions),
        })
    }
}

/// Convolutional blocks wrapped in an optional skip connection.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub conv_blocks: Vec<ConvolutionalBlock<B>>,
    /// 1×1 skip projection, present only for projected channel changes
    pub projection: Option<Conv3d<B>>,
    residual: bool,
    residual_type: Ignored<ResidualType>,
    in_channels: usize,
    out_channels: usize,
    dimensions: Ignored<Dimensions>,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        if !self.residual {
            return self.convolve(x);
        }
        let out = self.convolve(x.clone());
        let skip = self.skip(x);
        debug_assert_eq!(
            skip.dims(),
            out.dims(),
            "skip and residual paths must agree before the sum"
        );
        skip + out
    }

    /// The convolutional path.
    pub fn convolve(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.conv_blocks
            .iter()
            .fold(x, |acc, block| block.forward(acc))
    }

    /// The skip path, already reconciled to `out_channels`.
    pub fn skip(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        if self.in_channels == self.out_channels {
            return x;
        }
        match &self.projection {
            Some(projection) => projection.forward(x),
            None => {
                let [batch, channels, depth, height, width] = x.dims();
                let zeros = Tensor::<B, 5>::zeros(
                    [batch, self.out_channels - channels, depth, height, width],
                    &x.device(),
                );
                Tensor::cat(vec![x, zeros], 1)
            }
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn is_residual(&self) -> bool {
        self.residual
    }

    pub fn residual_type(&self) -> ResidualType {
        *self.residual_type
    }

    pub fn spread(&self) -> usize {
        self.conv_blocks.iter().map(ConvolutionalBlock::spread).sum()
    }

    pub fn num_parameters(&self) -> usize {
        let projection = self
            .projection
            .as_ref()
            .map_or(0, |conv| conv.weight.val().shape().num_elements());
        self.conv_blocks
            .iter()
            .map(ConvolutionalBlock::num_parameters)
            .sum::<usize>()
            + projection
    }

    pub(crate) fn collect(&self, prefix: &str, kind: TensorKind, out: &mut Vec<NamedTensor>) {
        for (idx, block) in self.conv_blocks.iter().enumerate() {
            block.collect(&join(prefix, &format!("conv_blocks.{idx}")), kind, out);
        }
        if let (TensorKind::Parameter, Some(projection)) = (kind, &self.projection) {
            out.push(NamedTensor::new(
                join(prefix, "projection.weight"),
                export_kernel(projection.weight.val(), *self.dimensions),
            ));
        }
    }

    pub(crate) fn load(mut self, prefix: &str, source: &mut TensorSource<B>) -> error::Result<Self> {
        self.conv_blocks = std::mem::take(&mut self.conv_blocks)
            .into_iter()
            .enumerate()
            .map(|(idx, block)| block.load(&join(prefix, &format!("conv_blocks.{idx}")), source))
            .collect::<error::Result<Vec<_>>>()?;
        if let Some(mut projection) = self.projection.take() {
            let expected = kernel_shape(projection.weight.val().dims(), *self.dimensions);
            projection.weight =
                source.param(&join(prefix, "projection.weight"), projection.weight, &expected)?;
            self.projection = Some(projection);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_identity_skip() {
        let device = Default::default();
        let block = ResidualBlockConfig::new(4, 4)
            .init::<TestBackend>(&device)
            .unwrap();
        assert!(block.projection.is_none());
        let x = Tensor::<TestBackend, 5>::random([1, 4, 6, 6, 6], Distribution::Default, &device);
        let skip = block.skip(x.clone());
        assert!(skip.equal(x.clone()).all().into_scalar());
        assert_eq!(block.forward(x).dims(), [1, 4, 6, 6, 6]);
    }

    #[test]
    fn test_pad_skip_appends_zero_channels() {
        let device = Default::default();
        let block = ResidualBlockConfig::new(2, 5)
            .with_residual_type(ResidualType::Pad)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 5>::random([2, 2, 4, 4, 4], Distribution::Default, &device);
        let skip = block.skip(x.clone());
        assert_eq!(skip.dims(), [2, 5, 4, 4, 4]);

        let head = skip.clone().slice([0..2, 0..2, 0..4, 0..4, 0..4]);
        assert!(head.equal(x.clone()).all().into_scalar());

        let tail = skip.slice([0..2, 2..5, 0..4, 0..4, 0..4]);
        assert_eq!(tail.abs().sum().into_scalar(), 0.0);

        assert_eq!(block.forward(x).dims(), [2, 5, 4, 4, 4]);
    }

    #[test]
    fn test_project_skip_has_output_channels() {
        let device = Default::default();
        let block = ResidualBlockConfig::new(3, 6)
            .with_residual_type(ResidualType::Project)
            .with_dilation(2)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(block.projection.as_ref().unwrap().weight.val().dims(), [6, 3, 1, 1, 1]);
        let x = Tensor::<TestBackend, 5>::random([1, 3, 7, 7, 7], Distribution::Default, &device);
        assert_eq!(block.skip(x.clone()).dims(), [1, 6, 7, 7, 7]);
        assert_eq!(block.forward(x).dims(), [1, 6, 7, 7, 7]);
    }

    #[test]
    fn test_without_residual_returns_conv_path() {
        let device = Default::default();
        let block = ResidualBlockConfig::new(2, 2)
            .with_residual(false)
            .with_normalization(Normalization::None)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 5>::random([1, 2, 5, 5, 5], Distribution::Default, &device);
        let expected = block.convolve(x.clone());
        let out = block.forward(x);
        assert!(out.equal(expected).all().into_scalar());
    }

    #[test]
    fn test_layer_channels() {
        let config = ResidualBlockConfig::new(2, 8).with_num_layers(3).with_dilation(4);
        let layers = config.layer_configs();
        assert_eq!(layers.len(), 3);
        assert_eq!((layers[0].in_channels, layers[0].out_channels), (2, 8));
        assert!(layers[1..].iter().all(|l| l.in_channels == 8 && l.out_channels == 8));
        assert!(layers.iter().all(|l| l.dilation == 4 && l.preactivation));

        let device = Default::default();
        let block = config.init::<TestBackend>(&device).unwrap();
        assert_eq!(block.spread(), 3 * 2 * 4);
    }

    #[test]
    fn test_pad_cannot_shrink_channels() {
        let device = Default::default();
        let result = ResidualBlockConfig::new(8, 4).init::<TestBackend>(&device);
        assert!(matches!(result, Err(HighResNetError::InvalidConfiguration(_))));

        let projected = ResidualBlockConfig::new(8, 4)
            .with_residual_type(ResidualType::Project)
            .init::<TestBackend>(&device);
        assert!(projected.is_ok());
    }

    #[test]
    fn test_zero_layers_rejected() {
        let device = Default::default();
        let result = ResidualBlockConfig::new(4, 4)
            .with_num_layers(0)
            .init::<TestBackend>(&device);
        assert!(matches!(result, Err(HighResNetError::InvalidConfiguration(_))));
    }
}
