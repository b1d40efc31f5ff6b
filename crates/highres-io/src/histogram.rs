//! Piecewise-linear histogram standardization (Nyúl & Udupa, 1999).
//!
//! Intensity landmarks of a volume are computed inside a foreground mask and
//! mapped onto the landmarks of a trained model. Between two landmarks the
//! mapping is linear; outside the outermost ones the first and last
//! segments are extended.
//!
//! Landmarks are the percentiles
//! `[cutoff.0, 10, 20, 25, 30, 40, 50, 60, 70, 75, 80, 90, cutoff.1]`.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ndarray::{Array3, Zip};

use crate::error::{IoError, Result};

/// Lower and upper landmark percentiles, as fractions.
pub const DEFAULT_CUTOFF: (f64, f64) = (0.01, 0.99);

/// Fixed inner landmark percentiles.
pub const INNER_PERCENTILES: [f64; 11] = [
    10.0, 20.0, 25.0, 30.0, 40.0, 50.0, 60.0, 70.0, 75.0, 80.0, 90.0,
];

/// Number of landmarks per modality.
pub const NUM_LANDMARKS: usize = INNER_PERCENTILES.len() + 2;

/// Which landmarks delimit the linear segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MappingKind {
    /// Cutoffs and quartiles.
    Quartile,
    /// Cutoffs and every decile.
    #[default]
    Percentile,
    /// Cutoffs and the median.
    Median,
}

impl MappingKind {
    /// Indices into the 13 landmarks.
    pub fn landmark_indices(self) -> &'static [usize] {
        match self {
            Self::Quartile => &[0, 3, 6, 9, 12],
            Self::Percentile => &[0, 1, 2, 4, 5, 6, 7, 8, 10, 11, 12],
            Self::Median => &[0, 6, 12],
        }
    }
}

impl FromStr for MappingKind {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quartile" => Ok(Self::Quartile),
            "percentile" => Ok(Self::Percentile),
            "median" => Ok(Self::Median),
            other => Err(IoError::HistogramModel(format!(
                "unknown mapping '{other}' (expected quartile, percentile or median)"
            ))),
        }
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Quartile => "quartile",
            Self::Percentile => "percentile",
            Self::Median => "median",
        })
    }
}

/// Foreground mask: voxels above the volume mean, with enclosed holes filled.
pub fn mean_plus_mask(volume: &Array3<f32>) -> Array3<bool> {
    let mean = volume.mean().unwrap_or(0.0);
    fill_holes(&volume.mapv(|v| v > mean))
}

/// Set every background voxel not 6-connected to the volume border.
pub fn fill_holes(mask: &Array3<bool>) -> Array3<bool> {
    let (nx, ny, nz) = mask.dim();
    let mut outside = Array3::from_elem(mask.dim(), false);
    let mut queue = VecDeque::new();

    for ((x, y, z), &inside) in mask.indexed_iter() {
        let on_border = x == 0 || y == 0 || z == 0 || x + 1 == nx || y + 1 == ny || z + 1 == nz;
        if on_border && !inside {
            outside[[x, y, z]] = true;
            queue.push_back([x, y, z]);
        }
    }

    while let Some([x, y, z]) = queue.pop_front() {
        let neighbours = [
            (x.wrapping_sub(1), y, z),
            (x + 1, y, z),
            (x, y.wrapping_sub(1), z),
            (x, y + 1, z),
            (x, y, z.wrapping_sub(1)),
            (x, y, z + 1),
        ];
        for (a, b, c) in neighbours {
            if a < nx && b < ny && c < nz && !mask[[a, b, c]] && !outside[[a, b, c]] {
                outside[[a, b, c]] = true;
                queue.push_back([a, b, c]);
            }
        }
    }

    outside.mapv(|o| !o)
}

/// Percentile `q` (0–100) of sorted values, interpolating linearly between
/// the two nearest ranks.
pub fn percentile(sorted: &[f32], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0] as f64,
        n => {
            let rank = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let (a, b) = (sorted[lo] as f64, sorted[hi] as f64);
            a + (b - a) * (rank - lo as f64)
        }
    }
}

/// The 13 intensity landmarks of the masked voxels.
pub fn landmarks(volume: &Array3<f32>, mask: &Array3<bool>, cutoff: (f64, f64)) -> Result<[f64; NUM_LANDMARKS]> {
    if volume.dim() != mask.dim() {
        return Err(IoError::ShapeMismatch {
            expected: volume.shape().to_vec(),
            actual: mask.shape().to_vec(),
        });
    }
    let mut values: Vec<f32> = volume
        .iter()
        .zip(mask.iter())
        .filter_map(|(&v, &m)| m.then_some(v))
        .collect();
    if values.is_empty() {
        return Err(IoError::EmptyMask);
    }
    values.sort_by(f32::total_cmp);

    let mut out = [0.0; NUM_LANDMARKS];
    out[0] = percentile(&values, cutoff.0 * 100.0);
    for (slot, &q) in out[1..NUM_LANDMARKS - 1].iter_mut().zip(&INNER_PERCENTILES) {
        *slot = percentile(&values, q);
    }
    out[NUM_LANDMARKS - 1] = percentile(&values, cutoff.1 * 100.0);
    Ok(out)
}

/// Trained landmarks per modality.
///
/// The text format has one line per modality: its name followed by 13
/// whitespace-separated landmark values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistogramModel {
    mappings: BTreeMap<String, Vec<f64>>,
}

impl HistogramModel {
    pub fn parse(text: &str) -> Result<Self> {
        let mut mappings = BTreeMap::new();
        for (line_no, line) in text.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let Some(name) = fields.next() else {
                continue;
            };
            let values = fields
                .map(|field| {
                    field.parse::<f64>().map_err(|_| {
                        IoError::HistogramModel(format!(
                            "line {}: '{field}' is not a number",
                            line_no + 1
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if values.len() != NUM_LANDMARKS {
                return Err(IoError::HistogramModel(format!(
                    "line {}: expected {NUM_LANDMARKS} landmarks for '{name}', got {}",
                    line_no + 1,
                    values.len()
                )));
            }
            mappings.insert(name.to_string(), values);
        }
        if mappings.is_empty() {
            return Err(IoError::HistogramModel("no modalities found".to_string()));
        }
        Ok(Self { mappings })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let model = Self::parse(&text)?;
        tracing::debug!(
            "Loaded histogram model with {} modalities from {}",
            model.mappings.len(),
            path.as_ref().display()
        );
        Ok(model)
    }

    pub fn mapping(&self, modality: &str) -> Option<&[f64]> {
        self.mappings.get(modality).map(Vec::as_slice)
    }

    pub fn modalities(&self) -> impl Iterator<Item = &str> {
        self.mappings.keys().map(String::as_str)
    }
}

/// Maps the landmarks of a volume onto trained landmarks.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramStandardizer {
    mapping: [f64; NUM_LANDMARKS],
    cutoff: (f64, f64),
    kind: MappingKind,
}

impl HistogramStandardizer {
    pub fn new(mapping: &[f64], cutoff: (f64, f64), kind: MappingKind) -> Result<Self> {
        let mapping: [f64; NUM_LANDMARKS] = mapping.try_into().map_err(|_| {
            IoError::HistogramModel(format!(
                "expected {NUM_LANDMARKS} landmarks, got {}",
                mapping.len()
            ))
        })?;
        if !(0.0 <= cutoff.0 && cutoff.0 < cutoff.1 && cutoff.1 <= 1.0) {
            return Err(IoError::HistogramModel(format!(
                "cutoff must satisfy 0 <= low < high <= 1, got {cutoff:?}"
            )));
        }
        Ok(Self {
            mapping,
            cutoff,
            kind,
        })
    }

    pub fn from_model(
        model: &HistogramModel,
        modality: &str,
        cutoff: (f64, f64),
        kind: MappingKind,
    ) -> Result<Self> {
        let mapping = model.mapping(modality).ok_or_else(|| {
            IoError::HistogramModel(format!("no landmarks for modality '{modality}'"))
        })?;
        Self::new(mapping, cutoff, kind)
    }

    /// Standardize every voxel, using only masked voxels for the landmarks.
    pub fn standardize(&self, volume: &Array3<f32>, mask: &Array3<bool>) -> Result<Array3<f32>> {
        let source = landmarks(volume, mask, self.cutoff)?;
        let segments = Segments::new(&source, &self.mapping, self.kind.landmark_indices());
        Ok(volume.mapv(|v| segments.apply(v as f64) as f32))
    }
}

/// Slopes and intercepts of the piecewise-linear mapping.
struct Segments {
    breakpoints: Vec<f64>,
    slopes: Vec<f64>,
    intercepts: Vec<f64>,
}

impl Segments {
    fn new(source: &[f64], target: &[f64], indices: &[usize]) -> Self {
        let xs: Vec<f64> = indices.iter().map(|&i| source[i]).collect();
        let ys: Vec<f64> = indices.iter().map(|&i| target[i]).collect();
        let (slopes, intercepts) = xs
            .windows(2)
            .zip(ys.windows(2))
            .map(|(x, y)| {
                let dx = x[1] - x[0];
                // Coincident landmarks collapse the segment to a constant.
                let slope = if dx == 0.0 { 0.0 } else { (y[1] - y[0]) / dx };
                (slope, y[0] - slope * x[0])
            })
            .unzip();
        Self {
            breakpoints: xs[1..xs.len() - 1].to_vec(),
            slopes,
            intercepts,
        }
    }

    fn apply(&self, v: f64) -> f64 {
        let segment = self.breakpoints.partition_point(|&b| b <= v);
        self.slopes[segment] * v + self.intercepts[segment]
    }
}

/// Zero every voxel outside the mask.
pub fn apply_mask(volume: &Array3<f32>, mask: &Array3<bool>) -> Array3<f32> {
    let mut out = volume.clone();
    Zip::from(&mut out).and(mask).for_each(|v, &m| {
        if !m {
            *v = 0.0;
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Array3<f32> {
        Array3::from_shape_fn((10, 10, 10), |(x, y, z)| (x * 100 + y * 10 + z) as f32)
    }

    #[test]
    fn test_percentile_matches_linear_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 100.0), 4.0);
        assert!((percentile(&sorted, 50.0) - 2.5).abs() < 1e-12);
        assert!((percentile(&sorted, 10.0) - 1.3).abs() < 1e-12);
    }

    #[test]
    fn test_landmarks_of_ramp() {
        let volume = ramp();
        let mask = Array3::from_elem(volume.dim(), true);
        let marks = landmarks(&volume, &mask, (0.0, 1.0)).unwrap();
        assert_eq!(marks[0], 0.0);
        assert_eq!(marks[NUM_LANDMARKS - 1], 999.0);
        assert!((marks[6] - 499.5).abs() < 1e-9);
        assert!(marks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_empty_mask_rejected() {
        let volume = ramp();
        let mask = Array3::from_elem(volume.dim(), false);
        assert!(matches!(landmarks(&volume, &mask, DEFAULT_CUTOFF), Err(IoError::EmptyMask)));
    }

    #[test]
    fn test_standardize_maps_landmarks_onto_model() {
        let volume = ramp();
        let mask = Array3::from_elem(volume.dim(), true);
        let source = landmarks(&volume, &mask, DEFAULT_CUTOFF).unwrap();

        for kind in [MappingKind::Quartile, MappingKind::Percentile, MappingKind::Median] {
            // A model at twice the scale plus an offset.
            let mapping: Vec<f64> = source.iter().map(|v| 2.0 * v + 10.0).collect();
            let standardizer = HistogramStandardizer::new(&mapping, DEFAULT_CUTOFF, kind).unwrap();
            let out = standardizer.standardize(&volume, &mask).unwrap();

            for (&v, &o) in volume.iter().zip(out.iter()) {
                assert!((o as f64 - (2.0 * v as f64 + 10.0)).abs() < 1e-2, "{kind}: {v} -> {o}");
            }
            let mapped = landmarks(&out, &mask, DEFAULT_CUTOFF).unwrap();
            for &idx in kind.landmark_indices() {
                assert!((mapped[idx] - mapping[idx]).abs() < 1e-2);
            }
        }
    }

    #[test]
    fn test_extrapolation_outside_cutoffs() {
        let volume = ramp();
        let mask = Array3::from_elem(volume.dim(), true);
        let source = landmarks(&volume, &mask, (0.1, 0.9)).unwrap();
        let mut mapping = [0.0; NUM_LANDMARKS];
        for (i, slot) in mapping.iter_mut().enumerate() {
            *slot = i as f64 * 10.0;
        }
        let standardizer = HistogramStandardizer::new(&mapping, (0.1, 0.9), MappingKind::Median).unwrap();
        let out = standardizer.standardize(&volume, &mask).unwrap();

        // Below the low cutoff the first segment continues linearly.
        let slope = (mapping[6] - mapping[0]) / (source[6] - source[0]);
        let expected = mapping[0] + slope * (0.0 - source[0]);
        assert!((out[[0, 0, 0]] as f64 - expected).abs() < 1e-3);
        assert!((out[[0, 0, 0]] as f64) < mapping[0]);
        assert!((out[[9, 9, 9]] as f64) > mapping[12]);
    }

    #[test]
    fn test_mean_plus_mask_fills_holes() {
        let mut volume = Array3::<f32>::zeros((9, 9, 9));
        for x in 2..7 {
            for y in 2..7 {
                for z in 2..7 {
                    volume[[x, y, z]] = 100.0;
                }
            }
        }
        volume[[4, 4, 4]] = 0.0;
        let mask = mean_plus_mask(&volume);
        assert!(mask[[4, 4, 4]]);
        assert!(mask[[2, 2, 2]]);
        assert!(!mask[[0, 0, 0]]);
        assert!(!mask[[1, 4, 4]]);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 125);
    }

    #[test]
    fn test_hole_open_to_border_is_kept() {
        let mut mask = Array3::from_elem((5, 5, 5), true);
        // Tunnel from the border into the centre.
        for x in 0..3 {
            mask[[x, 2, 2]] = false;
        }
        let filled = fill_holes(&mask);
        assert!(!filled[[2, 2, 2]]);
        assert_eq!(filled, mask);
    }

    #[test]
    fn test_parse_model() {
        let text = "Modality0 0.0 8.0 15.0 18.0 21.0 27.0 33.0 40.0 50.0 56.0 63.0 78.0 100.0\n\n\
                    t2 1 2 3 4 5 6 7 8 9 10 11 12 13\n";
        let model = HistogramModel::parse(text).unwrap();
        assert_eq!(model.modalities().collect::<Vec<_>>(), vec!["Modality0", "t2"]);
        assert_eq!(model.mapping("Modality0").unwrap()[12], 100.0);
        assert!(model.mapping("flair").is_none());

        assert!(HistogramModel::parse("Modality0 1 2 3").is_err());
        assert!(HistogramModel::parse("Modality0 a 2 3 4 5 6 7 8 9 10 11 12 13").is_err());
        assert!(HistogramModel::parse("\n\n").is_err());
    }

    #[test]
    fn test_invalid_standardizer() {
        let mapping = [0.0; NUM_LANDMARKS];
        assert!(HistogramStandardizer::new(&mapping[..5], DEFAULT_CUTOFF, MappingKind::Percentile).is_err());
        assert!(HistogramStandardizer::new(&mapping, (0.9, 0.1), MappingKind::Percentile).is_err());
        assert_eq!("quartile".parse::<MappingKind>().unwrap(), MappingKind::Quartile);
        assert!("linear".parse::<MappingKind>().is_err());
    }

    #[test]
    fn test_apply_mask() {
        let volume = Array3::from_elem((2, 2, 2), 3.0f32);
        let mut mask = Array3::from_elem((2, 2, 2), false);
        mask[[1, 1, 1]] = true;
        let out = apply_mask(&volume, &mask);
        assert_eq!(out.sum(), 3.0);
    }
}
