//! Channel-growth schedule and closed-form receptive field.
//!
//! Stage `d` of the trunk runs at dilation `2^d`. Stage 0 keeps the initial
//! width; every later stage doubles it:
//!
//! ```text
//! initial = 2^p
//! stage 0: initial       -> initial        dilation 1
//! stage 1: initial       -> 2 * initial    dilation 2
//! stage d: 2^(d-1) * ini -> 2^d * initial  dilation 2^d
//! ```

/// Spread of the initial 3-wide convolution.
pub const INITIAL_KERNEL_SPREAD: usize = 2;

/// Input/output widths and dilation of one dilation block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageWidths {
    pub in_channels: usize,
    pub out_channels: usize,
    pub dilation: usize,
}

/// Widths of every stage of the trunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSchedule {
    pub initial_channels: usize,
    pub stages: Vec<StageWidths>,
}

impl ChannelSchedule {
    /// Build the schedule for `2^initial_out_channels_power` initial channels
    /// and `num_dilations` stages.
    ///
    /// `initial_out_channels_power + num_dilations` must stay below the bit
    /// width of `usize`; [`crate::HighResNetConfig::validate`] enforces a
    /// tighter bound.
    pub fn new(initial_out_channels_power: usize, num_dilations: usize) -> Self {
        let initial_channels = 1usize << initial_out_channels_power;
        let (stages, _) = (0..num_dilations).fold(
            (Vec::with_capacity(num_dilations), initial_channels),
            |(mut stages, in_channels), idx| {
                let stage = StageWidths {
                    in_channels,
                    out_channels: initial_channels << idx,
                    dilation: 1 << idx,
                };
                stages.push(stage);
                (stages, stage.out_channels)
            },
        );
        Self {
            initial_channels,
            stages,
        }
    }

    /// Width of the trunk output (the last stage, or the initial block when
    /// there are no stages).
    pub fn trunk_channels(&self) -> usize {
        self.stages
            .last()
            .map_or(self.initial_channels, |stage| stage.out_channels)
    }

    /// Largest dilation used by the trunk.
    pub fn max_dilation(&self) -> usize {
        self.stages.last().map_or(1, |stage| stage.dilation)
    }
}

/// Receptive field, in voxels, of a HighResNet trunk.
///
/// With `B` layers per residual block, `N` residual blocks per dilation and
/// `D` dilation factors: `2 + Σ_{d<D} B·N·2^(d+1) + 1`. The 1×1 dropout and
/// classifier convolutions do not widen it.
///
/// Returns `None` when the result does not fit in a `usize`.
pub fn receptive_field(
    layers_per_residual_block: usize,
    residual_blocks_per_dilation: usize,
    num_dilations: usize,
) -> Option<usize> {
    let layers = layers_per_residual_block.checked_mul(residual_blocks_per_dilation)?;
    (1..=num_dilations).try_fold(INITIAL_KERNEL_SPREAD + 1, |total, exponent| {
        let spread = 2usize.checked_pow(u32::try_from(exponent).ok()?)?;
        total.checked_add(layers.checked_mul(spread)?)
    })
}
