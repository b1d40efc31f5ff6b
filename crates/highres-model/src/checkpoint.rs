//! Import of NiftyNet `highres3dnet` checkpoints.
//!
//! NiftyNet names tensors by scope:
//!
//! ```text
//! conv_0_bn_relu/conv_/w                 -> initial.conv.weight
//! conv_0_bn_relu/bn_/gamma               -> initial.norm.weight
//! res_2_0/bn_1/moving_variance           -> dilation_blocks.2.residual_blocks.0.conv_blocks.1.norm.running_var
//! res_1_2/conv_0/w                       -> dilation_blocks.1.residual_blocks.2.conv_blocks.0.conv.weight
//! conv_1_bn_relu/...                     -> dropout_projection...
//! conv_2_bn/...                          -> classifier...
//! ```
//!
//! and stores kernels channels-last, `[D, H, W, in, out]`.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::{HighResNetError, Result};
use crate::network::HighResNet;
use crate::params::{join, NamedTensor};

/// Map an external tensor name onto the qualified name used by
/// [`HighResNet::named_parameters`] and [`HighResNet::named_buffers`].
pub fn map_external_name(name: &str) -> Result<String> {
    let unknown = || HighResNetError::checkpoint(format!("unrecognized checkpoint name '{name}'"));

    let mut parts = name.split('/');
    let (Some(scope), Some(layer), Some(param), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(unknown());
    };

    let block = if let Some(indices) = scope.strip_prefix("res_") {
        let (dilation, residual) = indices.split_once('_').ok_or_else(unknown)?;
        let dilation: usize = dilation.parse().map_err(|_| unknown())?;
        let residual: usize = residual.parse().map_err(|_| unknown())?;
        let (_, index) = split_layer(layer).ok_or_else(unknown)?;
        let index: usize = index.parse().map_err(|_| unknown())?;
        format!("dilation_blocks.{dilation}.residual_blocks.{residual}.conv_blocks.{index}")
    } else {
        let block = match scope {
            "conv_0_bn_relu" => "initial",
            "conv_1_bn_relu" => "dropout_projection",
            "conv_2_bn" => "classifier",
            _ => return Err(unknown()),
        };
        if !matches!(layer, "conv_" | "bn_") {
            return Err(unknown());
        }
        block.to_string()
    };

    let (kind, _) = split_layer(layer).ok_or_else(unknown)?;
    let leaf = match (kind, param) {
        ("conv", "w") => "conv.weight",
        ("bn", "gamma") => "norm.weight",
        ("bn", "beta") => "norm.bias",
        ("bn", "moving_mean") => "norm.running_mean",
        ("bn", "moving_variance") => "norm.running_var",
        _ => return Err(unknown()),
    };
    Ok(join(&block, leaf))
}

/// `conv_0` -> (`conv`, `0`), `bn_` -> (`bn`, ``).
fn split_layer(layer: &str) -> Option<(&str, &str)> {
    let (kind, index) = layer.split_once('_')?;
    matches!(kind, "conv" | "bn").then_some((kind, index))
}

/// Reorder a channels-last tensor into the layout of the network.
///
/// Kernels go from `[D, H, W, in, out]` to `[out, in, D, H, W]` (and from
/// `[H, W, in, out]` to `[out, in, H, W]` for planar networks). Vectors pass
/// through unchanged.
pub fn convert_external_tensor<B: Backend>(
    data: TensorData,
    device: &B::Device,
) -> Result<TensorData> {
    match data.shape.len() {
        1 => Ok(data),
        4 => Ok(Tensor::<B, 4>::from_data(data, device)
            .permute([3, 2, 0, 1])
            .into_data()),
        5 => Ok(Tensor::<B, 5>::from_data(data, device)
            .permute([4, 3, 0, 1, 2])
            .into_data()),
        rank => Err(HighResNetError::checkpoint(format!(
            "cannot convert a rank-{rank} tensor"
        ))),
    }
}

impl<B: Backend> HighResNet<B> {
    /// Load tensors named and laid out the NiftyNet way.
    pub fn load_external_checkpoint<I, S>(self, tensors: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, TensorData)>,
        S: AsRef<str>,
    {
        let device = self.initial.conv.weight.val().device();
        let converted = tensors
            .into_iter()
            .map(|(name, data)| {
                let mapped = map_external_name(name.as_ref())?;
                tracing::debug!("{} -> {}", name.as_ref(), mapped);
                Ok(NamedTensor::new(mapped, convert_external_tensor::<B>(data, &device)?))
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::info!("Loading {} checkpoint tensors", converted.len());
        self.load_named_tensors(converted)
    }
}
