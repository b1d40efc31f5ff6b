use anyhow::{Context, Result};
use burn::tensor::TensorData;
use highres_model::NamedTensor;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One tensor of a JSON weights file.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl StoredTensor {
    pub fn from_named(tensor: &NamedTensor) -> Result<Self> {
        let values = tensor
            .data
            .clone()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {:?}", tensor.name, e))?;
        Ok(Self {
            name: tensor.name.clone(),
            shape: tensor.shape().to_vec(),
            values,
        })
    }

    pub fn into_named(self) -> Result<NamedTensor> {
        let expected: usize = self.shape.iter().product();
        anyhow::ensure!(
            expected == self.values.len(),
            "{}: shape {:?} needs {} values, found {}",
            self.name,
            self.shape,
            expected,
            self.values.len()
        );
        Ok(NamedTensor::new(self.name, TensorData::new(self.values, self.shape)))
    }
}

pub fn save(path: &Path, tensors: &[NamedTensor]) -> Result<()> {
    let stored = tensors
        .iter()
        .map(StoredTensor::from_named)
        .collect::<Result<Vec<_>>>()?;
    let json = serde_json::to_string(&stored)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn load(path: &Path) -> Result<Vec<NamedTensor>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let stored: Vec<StoredTensor> =
        serde_json::from_str(&text).context("Failed to parse weights file")?;
    stored.into_iter().map(StoredTensor::into_named).collect()
}
