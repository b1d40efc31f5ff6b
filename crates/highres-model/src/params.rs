//! Named parameter enumeration and loading.
//!
//! Names encode the structural path of a tensor, e.g.
//! `dilation_blocks.1.residual_blocks.0.conv_blocks.1.norm.weight`.
//! Learnable tensors (kernels, normalization scale and shift) are
//! [`TensorKind::Parameter`]; batch-norm running statistics are
//! [`TensorKind::Buffer`].

use std::collections::HashMap;

use burn::module::{Param, RunningState};
use burn::tensor::{backend::Backend, Tensor, TensorData};

use crate::error::{HighResNetError, Result};
use crate::spatial::Dimensions;

/// Which tensors an enumeration visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorKind {
    /// Tensors updated by an optimizer.
    Parameter,
    /// Running statistics updated as a side effect of training-mode forward.
    Buffer,
}

/// A tensor together with its qualified structural name.
#[derive(Debug, Clone)]
pub struct NamedTensor {
    pub name: String,
    pub data: TensorData,
}

impl NamedTensor {
    pub fn new(name: impl Into<String>, data: TensorData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.data.shape
    }

    pub fn num_elements(&self) -> usize {
        self.data.num_elements()
    }
}

/// Summary statistics of one named tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStatistics {
    pub name: String,
    pub shape: Vec<usize>,
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl ParameterStatistics {
    /// Population statistics of the tensor's values.
    pub fn of(tensor: &NamedTensor) -> Result<Self> {
        let values = tensor
            .data
            .clone()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| HighResNetError::checkpoint(format!("{}: {e:?}", tensor.name)))?;
        let count = values.len();
        let (mean, std, min, max) = if count == 0 {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let n = count as f64;
            let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
            let var = values
                .iter()
                .map(|&v| (v as f64 - mean).powi(2))
                .sum::<f64>()
                / n;
            let min = values.iter().fold(f64::INFINITY, |acc, &v| acc.min(v as f64));
            let max = values.iter().fold(f64::NEG_INFINITY, |acc, &v| acc.max(v as f64));
            (mean, var.sqrt(), min, max)
        };
        Ok(Self {
            name: tensor.name.clone(),
            shape: tensor.data.shape.clone(),
            count,
            mean,
            std,
            min,
            max,
        })
    }
}

/// Qualified name of `name` below `prefix`.
pub(crate) fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Export a convolution kernel with its public shape.
pub(crate) fn export_kernel<B: Backend>(weight: Tensor<B, 5>, dimensions: Dimensions) -> TensorData {
    match dimensions {
        Dimensions::Three => weight.into_data(),
        Dimensions::Two => {
            let [out_channels, in_channels, _, height, width] = weight.dims();
            weight
                .reshape([out_channels, in_channels, height, width])
                .into_data()
        }
    }
}

/// Public shape of a 5D kernel.
pub(crate) fn kernel_shape(dims: [usize; 5], dimensions: Dimensions) -> Vec<usize> {
    match dimensions {
        Dimensions::Three => dims.to_vec(),
        Dimensions::Two => vec![dims[0], dims[1], dims[3], dims[4]],
    }
}

/// Tensors waiting to be assigned to a network, keyed by qualified name.
pub(crate) struct TensorSource<B: Backend> {
    entries: HashMap<String, TensorData>,
    device: B::Device,
}

impl<B: Backend> TensorSource<B> {
    pub fn new(entries: HashMap<String, TensorData>, device: B::Device) -> Self {
        Self { entries, device }
    }

    /// Remove `name` and rebuild it with the internal layout `dims`.
    ///
    /// `expected` is the public shape the entry must have.
    fn take<const D: usize>(
        &mut self,
        name: &str,
        dims: [usize; D],
        expected: &[usize],
    ) -> Result<Option<Tensor<B, D>>> {
        let Some(data) = self.entries.remove(name) else {
            return Ok(None);
        };
        if data.shape != expected {
            return Err(HighResNetError::shape_mismatch(expected, &data.shape));
        }
        let values = data
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| HighResNetError::checkpoint(format!("{name}: {e:?}")))?;
        let len = values.len();
        let flat = Tensor::<B, 1>::from_data(TensorData::new(values, [len]), &self.device);
        Ok(Some(flat.reshape(dims)))
    }

    /// Replace a learnable parameter if the source holds `name`.
    pub fn param<const D: usize>(
        &mut self,
        name: &str,
        param: Param<Tensor<B, D>>,
        expected: &[usize],
    ) -> Result<Param<Tensor<B, D>>> {
        let dims = param.val().dims();
        Ok(match self.take(name, dims, expected)? {
            Some(tensor) => Param::from_tensor(tensor),
            None => param,
        })
    }

    /// Replace a running statistic if the source holds `name`.
    pub fn running<const D: usize>(
        &mut self,
        name: &str,
        state: RunningState<Tensor<B, D>>,
        expected: &[usize],
    ) -> Result<RunningState<Tensor<B, D>>> {
        let dims = state.value().dims();
        Ok(match self.take(name, dims, expected)? {
            Some(tensor) => RunningState::new(tensor),
            None => state,
        })
    }

    /// Fail if any entry was not consumed.
    pub fn finish(self) -> Result<()> {
        match self.entries.into_keys().min() {
            Some(name) => Err(HighResNetError::UnknownParameter(name)),
            None => Ok(()),
        }
    }
}
