//! Dilation block: residual blocks sharing one dilation factor.

use burn::prelude::*;

use crate::conv_block::Normalization;
use crate::error::{self, HighResNetError};
use crate::padding::PaddingMode;
use crate::params::{join, NamedTensor, TensorKind, TensorSource};
use crate::residual::{ResidualBlock, ResidualBlockConfig, ResidualType};
use crate::spatial::Dimensions;

/// Configuration for [`DilationBlock`].
#[derive(Config, Debug, PartialEq)]
pub struct DilationBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub dilation: usize,
    #[config(default = "3")]
    pub num_residual_blocks: usize,
    #[config(default = "2")]
    pub layers_per_block: usize,
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

impl DilationBlockConfig {
    /// Residual block configurations: the first changes width, the rest keep it.
    pub fn block_configs(&self) -> Vec<ResidualBlockConfig> {
        (0..self.num_residual_blocks)
            .map(|idx| {
                let in_channels = if idx == 0 {
                    self.in_channels
                } else {
                    self.out_channels
                };
                ResidualBlockConfig::new(in_channels, self.out_channels)
                    .with_num_layers(self.layers_per_block)
                    .with_dilation(self.dilation)
                    .with_residual(self.residual)
                    .with_residual_type(self.residual_type)
                    .with_normalization(self.normalization)
                    .with_padding_mode(self.padding_mode)
                    .with_dimensions(self.dimensions)
            })
            .collect()
    }

    /// Initialize a [`DilationBlock`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<DilationBlock<B>> {
        if self.num_residual_blocks == 0 {
            return Err(HighResNetError::invalid_configuration(
                "a dilation block needs at least one residual block",
            ));
        }
        let residual_blocks = self
            .block_configs()
            .iter()
            .map(|config| config.init(device))
            .collect::<error::Result<Vec<_>>>()?;

        Ok(DilationBlock {
            residual_blocks,
            dilation: self.dilation,
            in_channels: self.in_channels,
            out_channels: self.out_channels,
        })
    }
}

#[derive(Module, Debug)]
pub struct DilationBlock<B: Backend> {
    pub residual_blocks: Vec<ResidualBlock<B>>,
    dilation: usize,
    in_channels: usize,
    out_channels: usize,
}

impl<B: Backend> DilationBlock<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.residual_blocks
            .iter()
            .fold(x, |acc, block| block.forward(acc))
    }

    pub fn dilation(&self) -> usize {
        self.dilation
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn spread(&self) -> usize {
        self.residual_blocks.iter().map(ResidualBlock::spread).sum()
    }

    pub fn num_parameters(&self) -> usize {
        self.residual_blocks
            .iter()
            .map(ResidualBlock::num_parameters)
            .sum()
    }

    pub(crate) fn collect(&self, prefix: &str, kind: TensorKind, out: &mut Vec<NamedTensor>) {
        for (idx, block) in self.residual_blocks.iter().enumerate() {
            block.collect(&join(prefix, &format!("residual_blocks.{idx}")), kind, out);
        }
    }

    pub(crate) fn load(mut self, prefix: &str, source: &mut TensorSource<B>) -> error::Result<Self> {
        self.residual_blocks = std::mem::take(&mut self.residual_blocks)
            .into_iter()
            .enumerate()
            .map(|(idx, block)| block.load(&join(prefix, &format!("residual_blocks.{idx}")), source))
            .collect::<error::Result<Vec<_>>>()?;
        Ok(self)
    }
}
