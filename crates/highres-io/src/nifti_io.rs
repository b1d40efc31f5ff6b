use std::path::Path;

use ndarray::{Array3, ArrayD, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::error::{IoError, Result};

/// A scalar volume in NIfTI axis order `[X, Y, Z]` with the header it was
/// read from.
#[derive(Debug, Clone)]
pub struct Volume {
    pub data: Array3<f32>,
    pub header: NiftiHeader,
}

impl Volume {
    pub fn new(data: Array3<f32>, header: NiftiHeader) -> Self {
        Self { data, header }
    }

    /// Volume with a default header.
    pub fn from_array(data: Array3<f32>) -> Self {
        Self::new(data, NiftiHeader::default())
    }

    /// Same header, new voxels.
    pub fn with_data(&self, data: Array3<f32>) -> Result<Self> {
        if data.shape() != self.data.shape() {
            return Err(IoError::ShapeMismatch {
                expected: self.data.shape().to_vec(),
                actual: data.shape().to_vec(),
            });
        }
        Ok(Self::new(data, self.header.clone()))
    }

    pub fn shape(&self) -> [usize; 3] {
        let (x, y, z) = self.data.dim();
        [x, y, z]
    }

    /// Voxel size along X, Y and Z.
    pub fn spacing(&self) -> [f64; 3] {
        let pixdim = self.header.pixdim;
        [pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64]
    }
}

/// Read a NIfTI volume, applying the header's intensity scaling.
///
/// Trailing singleton axes (a single time point or modality) are dropped.
pub fn read_volume<P: AsRef<Path>>(path: P) -> Result<Volume> {
    let path = path.as_ref();
    let obj = ReaderOptions::new().read_file(path)?;
    let header = obj.header().clone();
    let array = obj.into_volume().into_ndarray::<f32>()?;
    let data = squeeze_to_3d(array)?;
    tracing::debug!("Read {:?} volume from {}", data.dim(), path.display());
    Ok(Volume::new(data, header))
}

/// Write a volume as `f32`, keeping the geometry of its header.
///
/// A `.nii.gz` extension produces a compressed file.
pub fn write_volume<P: AsRef<Path>>(path: P, volume: &Volume) -> Result<()> {
    let path = path.as_ref();
    let mut header = volume.header.clone();
    // Voxels are already in physical intensity units.
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&volume.data)?;
    tracing::debug!("Wrote {:?} volume to {}", volume.data.dim(), path.display());
    Ok(())
}

fn squeeze_to_3d(mut array: ArrayD<f32>) -> Result<Array3<f32>> {
    while array.ndim() > 3 && array.shape()[array.ndim() - 1] == 1 {
        let last = array.ndim() - 1;
        array = array.index_axis_move(Axis(last), 0);
    }
    let shape = array.shape().to_vec();
    array
        .into_dimensionality::<Ix3>()
        .map_err(|_| IoError::UnsupportedShape(shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};
    use tempfile::tempdir;

    #[test]
    fn test_volume_round_trip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("volume.nii");

        let data = Array3::from_shape_fn((3, 4, 5), |(x, y, z)| (x * 100 + y * 10 + z) as f32);
        let mut header = NiftiHeader::default();
        header.pixdim = [1.0, 0.5, 0.75, 2.0, 1.0, 1.0, 1.0, 1.0];
        write_volume(&file_path, &Volume::new(data.clone(), header)).unwrap();

        let volume = read_volume(&file_path).unwrap();
        assert_eq!(volume.shape(), [3, 4, 5]);
        assert_eq!(volume.data[[2, 3, 4]], 234.0);
        assert_eq!(volume.data, data);
        assert_eq!(volume.spacing(), [0.5, 0.75, 2.0]);
    }

    #[test]
    fn test_compressed_round_trip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("volume.nii.gz");

        let data = Array3::from_shape_fn((4, 4, 2), |(x, y, z)| (x + y + z) as f32 * 0.5);
        write_volume(&file_path, &Volume::from_array(data.clone())).unwrap();
        assert_eq!(read_volume(&file_path).unwrap().data, data);
    }

    #[test]
    fn test_trailing_singleton_axes_are_dropped() {
        let array = Array::from_elem(IxDyn(&[2, 3, 4, 1, 1]), 1.0f32);
        assert_eq!(squeeze_to_3d(array).unwrap().dim(), (2, 3, 4));

        let array = Array::from_elem(IxDyn(&[2, 3, 4, 2]), 1.0f32);
        assert!(matches!(
            squeeze_to_3d(array),
            Err(IoError::UnsupportedShape(shape)) if shape == vec![2, 3, 4, 2]
        ));
    }

    #[test]
    fn test_with_data_checks_shape() {
        let volume = Volume::from_array(Array3::zeros((2, 2, 2)));
        assert!(volume.with_data(Array3::ones((2, 2, 2))).is_ok());
        assert!(matches!(
            volume.with_data(Array3::ones((2, 2, 3))),
            Err(IoError::ShapeMismatch { .. })
        ));
    }
}
