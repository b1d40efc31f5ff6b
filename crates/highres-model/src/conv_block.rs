//! Convolutional block: the atomic unit of the network.
//!
//! ```text
//! preactivation:   [norm?] -> [relu?] -> pad -> conv
//! postactivation:  pad -> conv -> [norm?] -> [relu?]
//! ```
//!
//! Convolutions never carry a bias; the normalization shift takes its place.

use burn::module::Ignored;
use burn::nn::conv::{Conv3d, Conv3dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, InstanceNorm, InstanceNormConfig, PaddingConfig3d, Relu};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{self, HighResNetError};
use crate::padding::{PaddingMode, SpatialPad};
use crate::params::{export_kernel, join, kernel_shape, NamedTensor, TensorKind, TensorSource};
use crate::spatial::Dimensions;

/// Normalization applied inside a convolutional block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    #[default]
    None,
    Batch,
    Instance,
}

impl Normalization {
    /// Resolve the `batch_norm` / `instance_norm` flag pair.
    pub fn from_flags(batch_norm: bool, instance_norm: bool) -> error::Result<Self> {
        match (batch_norm, instance_norm) {
            (true, true) => Err(HighResNetError::invalid_configuration(
                "batch and instance normalization cannot both be enabled",
            )),
            (true, false) => Ok(Self::Batch),
            (false, true) => Ok(Self::Instance),
            (false, false) => Ok(Self::None),
        }
    }
}

/// Configuration for [`ConvolutionalBlock`].
#[derive(Config, Debug, PartialEq)]
pub struct ConvolutionalBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    #[config(default = "1")]
    pub dilation: usize,
    /// Odd kernel side; 1 gives a projection / classifier convolution.
    #[config(default = "3")]
    pub kernel_size: usize,
    #[config(default = "Dimensions::Three")]
    pub dimensions: Dimensions,
    #[config(default = "PaddingMode::Constant")]
    pub padding_mode: PaddingMode,
    #[config(default = "true")]
    pub preactivation: bool,
    #[config(default = "Normalization::Batch")]
    pub normalization: Normalization,
    #[config(default = "true")]
    pub activation: bool,
}

impl ConvolutionalBlockConfig {
    /// Pad amount that keeps the spatial shape: `dilation * (k - 1) / 2`.
    pub fn padding_amount(&self) -> usize {
        self.dilation * (self.kernel_size - 1) / 2
    }

    /// Number of input positions, minus one, spanned by the kernel per axis.
    pub fn spread(&self) -> usize {
        self.dilation * (self.kernel_size - 1)
    }

    pub fn validate(&self) -> error::Result<()> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(HighResNetError::invalid_configuration(format!(
                "convolution channels must be positive, got {} -> {}",
                self.in_channels, self.out_channels
            )));
        }
        if self.kernel_size % 2 == 0 {
            return Err(HighResNetError::invalid_configuration(format!(
                "kernel size must be odd to preserve spatial shape, got {}",
                self.kernel_size
            )));
        }
        if self.dilation == 0 {
            return Err(HighResNetError::invalid_configuration("dilation must be positive"));
        }
        Ok(())
    }

    /// Initialize a [`ConvolutionalBlock`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<ConvolutionalBlock<B>> {
        self.validate()?;

        let conv = Conv3dConfig::new(
            [self.in_channels, self.out_channels],
            self.dimensions.kernel(self.kernel_size),
        )
        .with_stride([1, 1, 1])
        .with_dilation(self.dimensions.dilation(self.dilation))
        .with_padding(PaddingConfig3d::Valid)
        .with_bias(false)
        .init(device);

        // Normalization sees the block input before the convolution and the
        // block output after it.
        let norm_channels = if self.preactivation {
            self.in_channels
        } else {
            self.out_channels
        };
        let (batch_norm, instance_norm) = match self.normalization {
            Normalization::None => (None, None),
            Normalization::Batch => (Some(BatchNormConfig::new(norm_channels).init(device)), None),
            Normalization::Instance => (
                None,
                Some(InstanceNormConfig::new(norm_channels).with_affine(true).init(device)),
            ),
        };

        Ok(ConvolutionalBlock {
            batch_norm,
            instance_norm,
            activation: self.activation.then(Relu::new),
            conv,
            pad: Ignored(SpatialPad::new(
                self.padding_amount(),
                self.padding_mode,
                self.dimensions,
            )),
            preactivation: self.preactivation,
            kernel_size: self.kernel_size,
            dilation: self.dilation,
            dimensions: Ignored(self.dimensions),
        })
    }
}

/// Optional normalization, optional ReLU, spatial padding and a bias-free
/// dilated convolution.
#[derive(Module, Debug)]
pub struct ConvolutionalBlock<B: Backend> {
    pub batch_norm: Option<BatchNorm<B, 3>>,
    pub instance_norm: Option<InstanceNorm<B>>,
    pub activation: Option<Relu>,
    pub conv: Conv3d<B>,
    pad: Ignored<SpatialPad>,
    preactivation: bool,
    kernel_size: usize,
    dilation: usize,
    dimensions: Ignored<Dimensions>,
}

impl<B: Backend> ConvolutionalBlock<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        if self.preactivation {
            let x = self.normalize(x);
            let x = self.activate(x);
            self.conv.forward(self.pad.forward(x))
        } else {
            let x = self.conv.forward(self.pad.forward(x));
            let x = self.normalize(x);
            self.activate(x)
        }
    }

    fn normalize(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        match (&self.batch_norm, &self.instance_norm) {
            (Some(norm), _) => norm.forward(x),
            (None, Some(norm)) => norm.forward(x),
            (None, None) => x,
        }
    }

    fn activate(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        match &self.activation {
            Some(relu) => relu.forward(x),
            None => x,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.conv.weight.val().dims()[1]
    }

    pub fn out_channels(&self) -> usize {
        self.conv.weight.val().dims()[0]
    }

    pub fn is_preactivation(&self) -> bool {
        self.preactivation
    }

    pub fn padding(&self) -> SpatialPad {
        *self.pad
    }

    /// Extra input positions per axis consumed by this block.
    pub fn spread(&self) -> usize {
        self.dilation * (self.kernel_size - 1)
    }

    pub fn num_parameters(&self) -> usize {
        let kernel = self.conv.weight.val().shape().num_elements();
        let norm = match (&self.batch_norm, &self.instance_norm) {
            (Some(norm), _) => 2 * norm.gamma.val().dims()[0],
            (None, Some(norm)) => norm
                .gamma
                .iter()
                .chain(norm.beta.iter())
                .map(|p| p.val().dims()[0])
                .sum(),
            (None, None) => 0,
        };
        kernel + norm
    }

    pub(crate) fn collect(&self, prefix: &str, kind: TensorKind, out: &mut Vec<NamedTensor>) {
        let conv = join(prefix, "conv");
        let norm = join(prefix, "norm");
        match kind {
            TensorKind::Parameter => {
                // Parameter order follows the forward order of the block.
                let kernel = NamedTensor::new(
                    join(&conv, "weight"),
                    export_kernel(self.conv.weight.val(), *self.dimensions),
                );
                let mut norm_params = Vec::new();
                if let Some(bn) = &self.batch_norm {
                    norm_params.push(NamedTensor::new(join(&norm, "weight"), bn.gamma.val().into_data()));
                    norm_params.push(NamedTensor::new(join(&norm, "bias"), bn.beta.val().into_data()));
                }
                if let Some(inorm) = &self.instance_norm {
                    if let Some(gamma) = &inorm.gamma {
                        norm_params.push(NamedTensor::new(join(&norm, "weight"), gamma.val().into_data()));
                    }
                    if let Some(beta) = &inorm.beta {
                        norm_params.push(NamedTensor::new(join(&norm, "bias"), beta.val().into_data()));
                    }
                }
                if self.preactivation {
                    out.extend(norm_params);
                    out.push(kernel);
                } else {
                    out.push(kernel);
                    out.extend(norm_params);
                }
            }
            TensorKind::Buffer => {
                if let Some(bn) = &self.batch_norm {
                    out.push(NamedTensor::new(
                        join(&norm, "running_mean"),
                        bn.running_mean.value().into_data(),
                    ));
                    out.push(NamedTensor::new(
                        join(&norm, "running_var"),
                        bn.running_var.value().into_data(),
                    ));
                }
            }
        }
    }

    pub(crate) fn load(mut self, prefix: &str, source: &mut TensorSource<B>) -> error::Result<Self> {
        let conv = join(prefix, "conv");
        let norm = join(prefix, "norm");
        let dimensions = *self.dimensions;

        let expected = kernel_shape(self.conv.weight.val().dims(), dimensions);
        self.conv.weight = source.param(&join(&conv, "weight"), self.conv.weight, &expected)?;

        if let Some(mut bn) = self.batch_norm.take() {
            let channels = [bn.gamma.val().dims()[0]];
            bn.gamma = source.param(&join(&norm, "weight"), bn.gamma, &channels)?;
            bn.beta = source.param(&join(&norm, "bias"), bn.beta, &channels)?;
            bn.running_mean = source.running(&join(&norm, "running_mean"), bn.running_mean, &channels)?;
            bn.running_var = source.running(&join(&norm, "running_var"), bn.running_var, &channels)?;
            self.batch_norm = Some(bn);
        }
        if let Some(mut inorm) = self.instance_norm.take() {
            if let Some(gamma) = inorm.gamma.take() {
                let channels = [gamma.val().dims()[0]];
                inorm.gamma = Some(source.param(&join(&norm, "weight"), gamma, &channels)?);
            }
            if let Some(beta) = inorm.beta.take() {
                let channels = [beta.val().dims()[0]];
                inorm.beta = Some(source.param(&join(&norm, "bias"), beta, &channels)?);
            }
            self.instance_norm = Some(inorm);
        }
        Ok(self)
    }
}
