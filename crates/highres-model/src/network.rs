//! HighResNet - dilated residual network for dense segmentation
//!
//! # Architecture Overview
//!
//! ```text
//! Input [batch, in_channels, (D,) H, W]
//!          │
//!          ▼
//!   3×3(×3) conv ─ norm ─ relu            initial = 2^p channels
//!          │
//!          ▼
//!   DilationBlock d=1   ─┐
//!   DilationBlock d=2    │  N residual blocks each,
//!   ...                  │  B preactivated convs per residual block,
//!   DilationBlock d=2^k ─┘  width doubling after the first stage
//!          │
//!          ▼
//!   [1×1 conv → 80 ─ norm ─ relu ─ channel dropout]   (optional)
//!          │
//!          ▼
//!   1×1 classifier conv ─ [norm]
//!          │
//!          ▼
//!   [softmax over channels]                           (optional)
//! ```
//!
//! Every block is shape-preserving, so the output has the input's spatial
//! shape and `out_channels` channels.
//!
//! References:
//! - Li et al., "On the Compactness, Efficiency, and Representation of 3D
//!   Convolutional Networks: Brain Parcellation as a Pretext Task" (IPMI 2017)

use std::fmt;

use burn::module::Ignored;
use burn::prelude::*;
use burn::tensor::activation::softmax;

use crate::conv_block::{ConvolutionalBlock, ConvolutionalBlockConfig, Normalization};
use crate::dilation::{DilationBlock, DilationBlockConfig};
use crate::dropout::ChannelDropout;
use crate::error::{self, HighResNetError};
use crate::padding::PaddingMode;
use crate::params::{join, NamedTensor, TensorKind, TensorSource};
use crate::residual::ResidualType;
use crate::schedule::{receptive_field, ChannelSchedule, StageWidths};
use crate::spatial::Dimensions;

/// Width of the optional 1×1 stage in front of the dropout layer.
///
/// Fixed by the NiftyNet reference network; it does not follow
/// `initial_out_channels_power`.
pub const DROPOUT_STAGE_CHANNELS: usize = 80;

/// Upper bound on `initial_out_channels_power + num_dilations`.
const MAX_CHANNEL_POWER: usize = 24;

/// Configuration for [`HighResNet`]
#[derive(Config, Debug, PartialEq)]
pub struct HighResNetConfig {
    /// Input channels (modalities)
    pub in_channels: usize,
    /// Output channels (classes)
    pub out_channels: usize,
    #[config(default = "Dimensions::Three")]
    pub dimensions: Dimensions,
    /// The initial convolution produces `2^initial_out_channels_power` channels
    #[config(default = "4")]
    pub initial_out_channels_power: usize,
    #[config(default = "2")]
    pub layers_per_residual_block: usize,
    #[config(default = "3")]
    pub residual_blocks_per_dilation: usize,
    /// Number of dilation factors `1, 2, ..., 2^(num_dilations-1)`
    #[config(default = "3")]
    pub num_dilations: usize,
    #[config(default = "true")]
    pub batch_norm: bool,
    #[config(default = "false")]
    pub instance_norm: bool,
    #[config(default = "true")]
    pub residual: bool,
    #[config(default = "ResidualType::Pad")]
    pub residual_type: ResidualType,
    #[config(default = "true")]
    pub softmax: bool,
    #[config(default = "PaddingMode::Constant")]
    pub padding_mode: PaddingMode,
    #[config(default = "false")]
    pub add_dropout_layer: bool,
    /// Probability of zeroing a channel in the dropout stage
    #[config(default = "0.5")]
    pub dropout_prob: f64,
    /// Normalize the classifier output
    #[config(default = "true")]
    pub add_last_norm_layer: bool,
}

impl HighResNetConfig {
    /// Parse and validate a JSON configuration, mapping every failure
    /// (including unknown padding modes and unsupported dimensionality) to
    /// [`HighResNetError::InvalidConfiguration`].
    pub fn from_json(json: &str) -> error::Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| HighResNetError::invalid_configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration and resolve its normalization.
    pub fn validate(&self) -> error::Result<Normalization> {
        let normalization = Normalization::from_flags(self.batch_norm, self.instance_norm)?;
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(HighResNetError::invalid_configuration(format!(
                "channel counts must be positive, got {} -> {}",
                self.in_channels, self.out_channels
            )));
        }
        if self.layers_per_residual_block == 0 || self.residual_blocks_per_dilation == 0 {
            return Err(HighResNetError::invalid_configuration(
                "layers_per_residual_block and residual_blocks_per_dilation must be positive",
            ));
        }
        let widest = self.initial_out_channels_power.checked_add(self.num_dilations);
        if widest.map_or(true, |power| power > MAX_CHANNEL_POWER) {
            return Err(HighResNetError::invalid_configuration(format!(
                "channel width 2^({} + {}) exceeds 2^{MAX_CHANNEL_POWER}",
                self.initial_out_channels_power, self.num_dilations
            )));
        }
        self.receptive_field()?;
        if !(0.0..1.0).contains(&self.dropout_prob) {
            return Err(HighResNetError::invalid_configuration(format!(
                "dropout probability must lie in [0, 1), got {}",
                self.dropout_prob
            )));
        }
        Ok(normalization)
    }

    /// Channel widths of the trunk, after validating the configuration.
    pub fn channel_schedule(&self) -> error::Result<ChannelSchedule> {
        self.validate()?;
        Ok(ChannelSchedule::new(
            self.initial_out_channels_power,
            self.num_dilations,
        ))
    }

    /// Closed-form receptive field in voxels.
    pub fn receptive_field(&self) -> error::Result<usize> {
        receptive_field(
            self.layers_per_residual_block,
            self.residual_blocks_per_dilation,
            self.num_dilations,
        )
        .ok_or_else(|| {
            HighResNetError::invalid_configuration(format!(
                "receptive field of {} dilations with {} x {} layers overflows",
                self.num_dilations, self.residual_blocks_per_dilation, self.layers_per_residual_block
            ))
        })
    }

    /// Initialize a [`HighResNet`].
    ///
    /// The whole configuration is validated before any block is allocated.
    /// The initial convolution follows `dimensions`, so a 2D network starts
    /// with a `[1, 3, 3]` kernel rather than a volumetric one.
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<HighResNet<B>> {
        let normalization = self.validate()?;
        let receptive_field = self.receptive_field()?;
        let schedule = ChannelSchedule::new(self.initial_out_channels_power, self.num_dilations);

        let initial = ConvolutionalBlockConfig::new(self.in_channels, schedule.initial_channels)
            .with_dilation(1)
            .with_kernel_size(3)
            .with_dimensions(self.dimensions)
            .with_padding_mode(self.padding_mode)
            .with_preactivation(false)
            .with_normalization(normalization)
            .init(device)?;

        let dilation_blocks = schedule
            .stages
            .iter()
            .enumerate()
            .map(|(idx, stage)| {
                tracing::debug!(
                    "Dilation block {}: {} -> {} channels, dilation {}",
                    idx,
                    stage.in_channels,
                    stage.out_channels,
                    stage.dilation
                );
                DilationBlockConfig::new(stage.in_channels, stage.out_channels, stage.dilation)
                    .with_num_residual_blocks(self.residual_blocks_per_dilation)
                    .with_layers_per_block(self.layers_per_residual_block)
                    .with_residual(self.residual)
                    .with_residual_type(self.residual_type)
                    .with_normalization(normalization)
                    .with_padding_mode(self.padding_mode)
                    .with_dimensions(self.dimensions)
                    .init(device)
            })
            .collect::<error::Result<Vec<_>>>()?;

        let trunk_channels = schedule.trunk_channels();
        let (dropout_projection, classifier_in) = if self.add_dropout_layer {
            let block = self
                .pointwise(trunk_channels, DROPOUT_STAGE_CHANNELS, normalization)
                .init(device)?;
            (Some(block), DROPOUT_STAGE_CHANNELS)
        } else {
            (None, trunk_channels)
        };

        let classifier_norm = if self.add_last_norm_layer {
            normalization
        } else {
            Normalization::None
        };
        let classifier = self
            .pointwise(classifier_in, self.out_channels, classifier_norm)
            .with_activation(false)
            .init(device)?;

        let network = HighResNet {
            initial,
            dilation_blocks,
            dropout_projection,
            classifier,
            dropout: Ignored(
                self.add_dropout_layer
                    .then(|| ChannelDropout::new(self.dropout_prob)),
            ),
            softmax: self.softmax,
            receptive_field: Ignored(receptive_field),
            config: Ignored(self.clone()),
        };

        tracing::info!(
            "HighResNet ({}): {} -> {} channels, {} stages, {} parameters, receptive field {}",
            self.dimensions,
            self.in_channels,
            self.out_channels,
            network.dilation_blocks.len(),
            network.num_parameters(),
            network.receptive_field()
        );
        Ok(network)
    }

    /// 1×1 postactivation block.
    fn pointwise(
        &self,
        in_channels: usize,
        out_channels: usize,
        normalization: Normalization,
    ) -> ConvolutionalBlockConfig {
        ConvolutionalBlockConfig::new(in_channels, out_channels)
            .with_kernel_size(1)
            .with_dimensions(self.dimensions)
            .with_padding_mode(self.padding_mode)
            .with_preactivation(false)
            .with_normalization(normalization)
    }
}

/// HighResNet segmentation network
#[derive(Module, Debug)]
pub struct HighResNet<B: Backend> {
    /// First 3×3(×3) postactivation convolution
    pub initial: ConvolutionalBlock<B>,
    /// One block per dilation factor
    pub dilation_blocks: Vec<DilationBlock<B>>,
    /// 1×1 projection in front of the dropout layer
    pub dropout_projection: Option<ConvolutionalBlock<B>>,
    /// 1×1 linear classifier
    pub classifier: ConvolutionalBlock<B>,
    dropout: Ignored<Option<ChannelDropout>>,
    softmax: bool,
    receptive_field: Ignored<usize>,
    config: Ignored<HighResNetConfig>,
}

impl<B: Backend> HighResNet<B> {
    /// Forward pass on 5D input `[batch, in_channels, depth, height, width]`.
    ///
    /// See [`HighResNet::try_forward`] for a variant that validates the input.
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.initial.forward(x);
        let x = self
            .dilation_blocks
            .iter()
            .fold(x, |acc, block| block.forward(acc));
        let x = match &self.dropout_projection {
            Some(block) => block.forward(x),
            None => x,
        };
        let x = match *self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };
        let x = self.classifier.forward(x);
        if self.softmax {
            softmax(x, 1)
        } else {
            x
        }
    }

    /// Forward pass on planar input `[batch, in_channels, height, width]`.
    pub fn forward_planar(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(x.unsqueeze_dim::<5>(2)).squeeze::<4>(2)
    }

    /// Validate a volumetric input, then run [`HighResNet::forward`].
    pub fn try_forward(&self, x: Tensor<B, 5>) -> error::Result<Tensor<B, 5>> {
        self.check_input(Dimensions::Three, &x.dims())?;
        Ok(self.forward(x))
    }

    /// Validate a planar input, then run [`HighResNet::forward_planar`].
    pub fn try_forward_planar(&self, x: Tensor<B, 4>) -> error::Result<Tensor<B, 4>> {
        self.check_input(Dimensions::Two, &x.dims())?;
        Ok(self.forward_planar(x))
    }

    fn check_input(&self, rank: Dimensions, dims: &[usize]) -> error::Result<()> {
        let dimensions = self.config.dimensions;
        if rank != dimensions {
            return Err(HighResNetError::invalid_configuration(format!(
                "a {dimensions} network cannot process {rank} input"
            )));
        }
        if dims[1] != self.config.in_channels {
            let mut expected = dims.to_vec();
            expected[1] = self.config.in_channels;
            return Err(HighResNetError::shape_mismatch(&expected, dims));
        }
        if dims[2..].contains(&0) {
            return Err(HighResNetError::invalid_configuration(format!(
                "spatial extents must be positive, got {:?}",
                &dims[2..]
            )));
        }
        let max_padding = self.max_padding();
        if let Some(&extent) = dims[2..]
            .iter()
            .find(|&&extent| self.config.padding_mode.max_amount(extent).is_some_and(|max| max < max_padding))
        {
            return Err(HighResNetError::invalid_configuration(format!(
                "{} padding of {max_padding} needs spatial extents above {max_padding}, got {extent}",
                self.config.padding_mode
            )));
        }
        Ok(())
    }

    /// Largest pad amount of any block.
    fn max_padding(&self) -> usize {
        self.blocks()
            .map(|block| block.padding().amount)
            .max()
            .unwrap_or(0)
    }

    /// Every convolutional block in forward order.
    fn blocks(&self) -> impl Iterator<Item = &ConvolutionalBlock<B>> {
        std::iter::once(&self.initial)
            .chain(
                self.dilation_blocks
                    .iter()
                    .flat_map(|d| d.residual_blocks.iter())
                    .flat_map(|r| r.conv_blocks.iter()),
            )
            .chain(self.dropout_projection.iter())
            .chain(std::iter::once(&self.classifier))
    }

    pub fn config(&self) -> &HighResNetConfig {
        &self.config
    }

    pub fn dimensions(&self) -> Dimensions {
        self.config.dimensions
    }

    pub fn in_channels(&self) -> usize {
        self.config.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.config.out_channels
    }

    pub fn has_softmax(&self) -> bool {
        self.softmax
    }

    /// Element count of all learnable tensors; running statistics excluded.
    pub fn num_parameters(&self) -> usize {
        let projections: usize = self
            .dilation_blocks
            .iter()
            .flat_map(|d| d.residual_blocks.iter())
            .filter_map(|r| r.projection.as_ref())
            .map(|conv| conv.weight.val().shape().num_elements())
            .sum();
        self.blocks()
            .map(ConvolutionalBlock::num_parameters)
            .sum::<usize>()
            + projections
    }

    /// Closed-form receptive field in voxels.
    pub fn receptive_field(&self) -> usize {
        *self.receptive_field
    }

    /// Receptive field obtained by summing the spread of every assembled
    /// block along the forward path.
    pub fn structural_receptive_field(&self) -> usize {
        self.blocks().map(ConvolutionalBlock::spread).sum::<usize>() + 1
    }

    /// Receptive field in physical units for isotropic `spacing`.
    pub fn receptive_field_in_physical_units(&self, spacing: f64) -> f64 {
        self.receptive_field() as f64 * spacing
    }

    /// Receptive field in physical units along each axis.
    pub fn receptive_field_extent<const N: usize>(&self, spacing: [f64; N]) -> [f64; N] {
        let voxels = self.receptive_field() as f64;
        spacing.map(|s| voxels * s)
    }

    /// Learnable tensors in forward order with their qualified names.
    pub fn named_parameters(&self) -> Vec<NamedTensor> {
        self.named_tensors(TensorKind::Parameter)
    }

    /// Batch-norm running statistics with their qualified names.
    pub fn named_buffers(&self) -> Vec<NamedTensor> {
        self.named_tensors(TensorKind::Buffer)
    }

    fn named_tensors(&self, kind: TensorKind) -> Vec<NamedTensor> {
        let mut out = Vec::new();
        self.initial.collect("initial", kind, &mut out);
        for (idx, block) in self.dilation_blocks.iter().enumerate() {
            block.collect(&join("dilation_blocks", &idx.to_string()), kind, &mut out);
        }
        if let Some(block) = &self.dropout_projection {
            block.collect("dropout_projection", kind, &mut out);
        }
        self.classifier.collect("classifier", kind, &mut out);
        out
    }

    /// Replace parameters and running statistics by qualified name.
    ///
    /// Shapes must match the public shapes reported by
    /// [`HighResNet::named_parameters`]; names that match nothing fail with
    /// [`HighResNetError::UnknownParameter`]. Tensors not mentioned are kept.
    pub fn load_named_tensors<I>(self, tensors: I) -> error::Result<Self>
    where
        I: IntoIterator<Item = NamedTensor>,
    {
        let device = self.initial.conv.weight.val().device();
        let entries = tensors
            .into_iter()
            .map(|tensor| (tensor.name, tensor.data))
            .collect();
        let mut source = TensorSource::<B>::new(entries, device);
        let network = self.load(&mut source)?;
        source.finish()?;
        Ok(network)
    }

    fn load(mut self, source: &mut TensorSource<B>) -> error::Result<Self> {
        self.initial = self.initial.load("initial", source)?;
        self.dilation_blocks = std::mem::take(&mut self.dilation_blocks)
            .into_iter()
            .enumerate()
            .map(|(idx, block)| block.load(&join("dilation_blocks", &idx.to_string()), source))
            .collect::<error::Result<Vec<_>>>()?;
        if let Some(block) = self.dropout_projection.take() {
            self.dropout_projection = Some(block.load("dropout_projection", source)?);
        }
        self.classifier = self.classifier.load("classifier", source)?;
        Ok(self)
    }

    /// Structural summary of the assembled network.
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            dimensions: self.config.dimensions,
            in_channels: self.config.in_channels,
            initial_channels: self.initial.out_channels(),
            stages: self
                .dilation_blocks
                .iter()
                .map(|block| StageWidths {
                    in_channels: block.in_channels(),
                    out_channels: block.out_channels(),
                    dilation: block.dilation(),
                })
                .collect(),
            dropout_channels: self
                .dropout_projection
                .as_ref()
                .map(ConvolutionalBlock::out_channels),
            out_channels: self.classifier.out_channels(),
            softmax: self.softmax,
            num_parameters: self.num_parameters(),
            receptive_field: self.receptive_field(),
        }
    }
}

/// Widths, size and receptive field of an assembled network.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub dimensions: Dimensions,
    pub in_channels: usize,
    pub initial_channels: usize,
    pub stages: Vec<StageWidths>,
    pub dropout_channels: Option<usize>,
    pub out_channels: usize,
    pub softmax: bool,
    pub num_parameters: usize,
    pub receptive_field: usize,
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HighResNet ({})", self.dimensions)?;
        writeln!(f, "  initial:    {} -> {}", self.in_channels, self.initial_channels)?;
        for (idx, stage) in self.stages.iter().enumerate() {
            writeln!(
                f,
                "  stage {idx}:    {} -> {} (dilation {})",
                stage.in_channels, stage.out_channels, stage.dilation
            )?;
        }
        let trunk = self
            .stages
            .last()
            .map_or(self.initial_channels, |s| s.out_channels);
        let head_in = match self.dropout_channels {
            Some(channels) => {
                writeln!(f, "  dropout:    {trunk} -> {channels}")?;
                channels
            }
            None => trunk,
        };
        writeln!(
            f,
            "  classifier: {head_in} -> {}{}",
            self.out_channels,
            if self.softmax { " (softmax)" } else { "" }
        )?;
        writeln!(f, "  parameters: {}", self.num_parameters)?;
        write!(f, "  receptive field: {} voxels", self.receptive_field)
    }
}

/// Preset configurations
pub mod presets {
    use super::*;

    /// The NiftyNet `highres3dnet` layout: 16/32/64 channels, three residual
    /// blocks per dilation and the 80-channel dropout stage.
    pub fn niftynet(in_channels: usize, out_channels: usize) -> HighResNetConfig {
        HighResNetConfig::new(in_channels, out_channels)
            .with_add_dropout_layer(true)
    }

    /// Planar variant of the default network.
    pub fn planar(in_channels: usize, out_channels: usize) -> HighResNetConfig {
        HighResNetConfig::new(in_channels, out_channels).with_dimensions(Dimensions::Two)
    }

    /// Small network for quick experiments and tests.
    ///
    /// 4/8 channels, one residual block per dilation, receptive field 15.
    pub fn compact(in_channels: usize, out_channels: usize) -> HighResNetConfig {
        HighResNetConfig::new(in_channels, out_channels)
            .with_initial_out_channels_power(2)
            .with_residual_blocks_per_dilation(1)
            .with_num_dilations(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_default_network_structure() {
        let device = Default::default();
        let network = HighResNetConfig::new(1, 4)
            .init::<TestBackend>(&device)
            .unwrap();

        assert_eq!(network.initial.out_channels(), 16);
        let widths: Vec<_> = network
            .dilation_blocks
            .iter()
            .map(|b| (b.in_channels(), b.out_channels(), b.dilation()))
            .collect();
        assert_eq!(widths, vec![(16, 16, 1), (16, 32, 2), (32, 64, 4)]);
        assert!(network
            .dilation_blocks
            .iter()
            .all(|b| b.residual_blocks.len() == 3));
        assert!(network.dropout_projection.is_none());
        assert_eq!(network.classifier.in_channels(), 64);
        assert_eq!(network.classifier.out_channels(), 4);
        assert!(!network.initial.is_preactivation());
        assert!(network.classifier.activation.is_none());
        assert_eq!(network.receptive_field(), 87);
        assert_eq!(network.structural_receptive_field(), 87);
    }

    #[test]
    fn test_dropout_stage() {
        let device = Default::default();
        let network = presets::niftynet(1, 160)
            .init::<TestBackend>(&device)
            .unwrap();
        let dropout = network.dropout_projection.as_ref().unwrap();
        assert_eq!(dropout.in_channels(), 64);
        assert_eq!(dropout.out_channels(), DROPOUT_STAGE_CHANNELS);
        assert_eq!(network.classifier.in_channels(), DROPOUT_STAGE_CHANNELS);
        assert_eq!(network.summary().dropout_channels, Some(80));
    }

    #[test]
    fn test_last_norm_layer_flag() {
        let device = Default::default();
        let with_norm = presets::compact(1, 2).init::<TestBackend>(&device).unwrap();
        assert!(with_norm.classifier.batch_norm.is_some());

        let without = presets::compact(1, 2)
            .with_add_last_norm_layer(false)
            .init::<TestBackend>(&device)
            .unwrap();
        assert!(without.classifier.batch_norm.is_none());
        assert_eq!(with_norm.num_parameters() - without.num_parameters(), 2 * 2);
    }

    #[test]
    fn test_parameter_count_matches_named_parameters() {
        let device = Default::default();
        let network = presets::compact(2, 3)
            .with_residual_type(ResidualType::Project)
            .init::<TestBackend>(&device)
            .unwrap();
        let named: usize = network
            .named_parameters()
            .iter()
            .map(NamedTensor::num_elements)
            .sum();
        assert_eq!(network.num_parameters(), named);

        // Buffers are reported separately and not counted.
        let buffers = network.named_buffers();
        assert!(!buffers.is_empty());
        assert!(buffers.iter().all(|b| b.name.ends_with("running_mean") || b.name.ends_with("running_var")));
    }

    #[test]
    fn test_parameter_names() {
        let device = Default::default();
        let network = presets::compact(1, 3)
            .with_residual_type(ResidualType::Project)
            .init::<TestBackend>(&device)
            .unwrap();
        let names: Vec<_> = network
            .named_parameters()
            .into_iter()
            .map(|t| t.name)
            .collect();

        assert_eq!(names[0], "initial.conv.weight");
        assert_eq!(names[1], "initial.norm.weight");
        assert!(names.contains(&"dilation_blocks.0.residual_blocks.0.conv_blocks.1.norm.bias".to_string()));
        assert!(names.contains(&"dilation_blocks.1.residual_blocks.0.projection.weight".to_string()));
        // Stage 0 keeps its width, so it has no projection.
        assert!(!names.contains(&"dilation_blocks.0.residual_blocks.0.projection.weight".to_string()));
        assert_eq!(names.last().unwrap(), "classifier.norm.bias");
    }

    #[test]
    fn test_receptive_field_in_physical_units() {
        let device = Default::default();
        let network = presets::compact(1, 2).init::<TestBackend>(&device).unwrap();
        assert_eq!(network.receptive_field_in_physical_units(1.5), 22.5);
        assert_eq!(network.receptive_field_extent([1.0, 0.5, 2.0]), [15.0, 7.5, 30.0]);
    }

    #[test]
    fn test_try_forward_rejects_bad_input() {
        let device = Default::default();
        let network = presets::compact(2, 3)
            .with_padding_mode(PaddingMode::Reflect)
            .init::<TestBackend>(&device)
            .unwrap();

        let wrong_channels = Tensor::<TestBackend, 5>::zeros([1, 1, 8, 8, 8], &device);
        assert!(matches!(
            network.try_forward(wrong_channels),
            Err(HighResNetError::ShapeMismatch { .. })
        ));

        // Largest dilation is 2, so reflect padding needs extents above 2.
        let too_small = Tensor::<TestBackend, 5>::zeros([1, 2, 2, 8, 8], &device);
        assert!(matches!(
            network.try_forward(too_small),
            Err(HighResNetError::InvalidConfiguration(_))
        ));

        let planar = Tensor::<TestBackend, 4>::zeros([1, 2, 8, 8], &device);
        assert!(matches!(
            network.try_forward_planar(planar),
            Err(HighResNetError::InvalidConfiguration(_))
        ));

        let ok = Tensor::<TestBackend, 5>::random([1, 2, 5, 5, 5], Distribution::Default, &device);
        assert_eq!(network.try_forward(ok).unwrap().dims(), [1, 3, 5, 5, 5]);
    }

    #[test]
    fn test_validation_errors() {
        let device = Default::default();
        let cases = vec![
            HighResNetConfig::new(1, 2).with_batch_norm(true).with_instance_norm(true),
            HighResNetConfig::new(0, 2),
            HighResNetConfig::new(1, 2).with_layers_per_residual_block(0),
            HighResNetConfig::new(1, 2).with_residual_blocks_per_dilation(0),
            HighResNetConfig::new(1, 2).with_dropout_prob(1.0),
            HighResNetConfig::new(1, 2).with_initial_out_channels_power(30),
        ];
        for config in cases {
            assert!(matches!(
                config.init::<TestBackend>(&device),
                Err(HighResNetError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_summary_display() {
        let device = Default::default();
        let network = presets::compact(1, 3).init::<TestBackend>(&device).unwrap();
        let text = network.summary().to_string();
        assert!(text.contains("stage 1:    4 -> 8 (dilation 2)"));
        assert!(text.contains("classifier: 8 -> 3 (softmax)"));
        assert!(text.contains("receptive field: 15 voxels"));
    }
}
