//! Conversion between volumes and network tensors.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use ndarray::Array3;

use crate::error::{IoError, Result};
use crate::nifti_io::Volume;

/// Stack single-modality volumes into a `[1, modalities, X, Y, Z]` tensor.
pub fn volumes_to_tensor<B: Backend>(volumes: &[Volume], device: &B::Device) -> Result<Tensor<B, 5>> {
    let Some(first) = volumes.first() else {
        return Err(IoError::UnsupportedShape(Vec::new()));
    };
    let [x, y, z] = first.shape();
    let mut values = Vec::with_capacity(volumes.len() * x * y * z);
    for volume in volumes {
        if volume.shape() != [x, y, z] {
            return Err(IoError::ShapeMismatch {
                expected: vec![x, y, z],
                actual: volume.shape().to_vec(),
            });
        }
        // Logical order, whatever the memory layout.
        values.extend(volume.data.iter().copied());
    }
    let data = TensorData::new(values, [1, volumes.len(), x, y, z]);
    Ok(Tensor::from_data(data, device))
}

/// Copy a `[X, Y, Z]` tensor into an array.
pub fn tensor_to_array<B: Backend>(tensor: Tensor<B, 3>) -> Result<Array3<f32>> {
    let [x, y, z] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| IoError::TensorData(format!("{e:?}")))?;
    Array3::from_shape_vec((x, y, z), values).map_err(|e| IoError::TensorData(e.to_string()))
}

/// Per-voxel arg-max over the channel axis of the first batch item.
pub fn label_map<B: Backend>(scores: Tensor<B, 5>) -> Result<Array3<f32>> {
    let [_, _, x, y, z] = scores.dims();
    let labels: Tensor<B, 5, Int> = scores.narrow(0, 0, 1).argmax(1);
    tensor_to_array(labels.float().reshape([x, y, z]))
}
