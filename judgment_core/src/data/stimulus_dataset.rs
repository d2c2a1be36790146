//! Stimulus images paired with per-head area measurements.
//!
//! Rendering the dot and rectangle stimuli happens elsewhere; this container
//! is what the pipeline loads from disk for training and evaluation.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{concatenate, Array1, Array4, ArrayView4, Axis, Slice};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{check_version, CheckpointError, Checkpointable};
use crate::error::{JudgmentError, JudgmentResult};
use crate::reference::JudgmentTag;

const DATASET_CHECKPOINT_VERSION: u32 = 1;

/// Images `N×H×W×C` in `[0, 1]` plus zero or more measurement columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusDataset {
    images: Array4<f32>,
    measurements: BTreeMap<JudgmentTag, Vec<f32>>,
}

impl StimulusDataset {
    /// Builds a dataset after checking every measurement column.
    pub fn new(
        images: Array4<f32>,
        measurements: BTreeMap<JudgmentTag, Vec<f32>>,
    ) -> JudgmentResult<Self> {
        let (n, height, width, depth) = images.dim();
        if n == 0 || height == 0 || width == 0 || depth == 0 {
            return Err(JudgmentError::invalid_config(
                "dataset.images",
                format!("{:?}", images.dim()),
                "images must be non-empty in every dimension",
            ));
        }

        for (tag, values) in &measurements {
            if values.len() != n {
                return Err(JudgmentError::dimension_mismatch(
                    n,
                    values.len(),
                    format!("{tag} measurements per image"),
                ));
            }
            if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
                return Err(JudgmentError::invalid_config(
                    format!("dataset.measurements.{tag}"),
                    bad,
                    "measurements must be finite and non-negative",
                ));
            }
        }

        Ok(Self {
            images,
            measurements,
        })
    }

    /// Dataset with no stored measurements; MA falls back to pixel area.
    pub fn from_images(images: Array4<f32>) -> JudgmentResult<Self> {
        Self::new(images, BTreeMap::new())
    }

    pub fn images(&self) -> ArrayView4<'_, f32> {
        self.images.view()
    }

    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-image shape as (height, width, channels).
    pub fn image_shape(&self) -> (usize, usize, usize) {
        let (_, height, width, depth) = self.images.dim();
        (height, width, depth)
    }

    /// Tags with stored measurements.
    pub fn tags(&self) -> impl Iterator<Item = JudgmentTag> + '_ {
        self.measurements.keys().copied()
    }

    /// Measurements for one head.
    ///
    /// `MA` and the default head fall back to [`pixel_area`] when no column
    /// was stored; `AA` has no fallback.
    pub fn measurements_for(&self, tag: JudgmentTag) -> JudgmentResult<Vec<f32>> {
        if let Some(values) = self.measurements.get(&tag) {
            return Ok(values.clone());
        }
        match tag {
            JudgmentTag::MeanArea | JudgmentTag::Default => Ok(pixel_area(self.images.view()).to_vec()),
            JudgmentTag::AggregateArea => Err(JudgmentError::MissingMeasurement {
                tag: tag.to_string(),
            }),
        }
    }

    /// Joins several datasets in order.
    ///
    /// Image shapes must agree, and every part must carry the same set of
    /// measurement tags.
    pub fn concatenate(parts: &[StimulusDataset]) -> JudgmentResult<Self> {
        let Some(first) = parts.first() else {
            return Err(JudgmentError::invalid_config(
                "dataset.parts",
                0,
                "at least one dataset is required",
            ));
        };

        let shape = first.image_shape();
        let tags: Vec<JudgmentTag> = first.tags().collect();
        for part in &parts[1..] {
            if part.image_shape() != shape {
                let (h, w, c) = part.image_shape();
                return Err(JudgmentError::shape_mismatch(
                    "concatenated image shape",
                    &[shape.0, shape.1, shape.2],
                    &[h, w, c],
                ));
            }
            let part_tags: Vec<JudgmentTag> = part.tags().collect();
            if part_tags != tags {
                let missing = tags
                    .iter()
                    .chain(part_tags.iter())
                    .find(|tag| !(tags.contains(tag) && part_tags.contains(tag)))
                    .copied()
                    .unwrap_or(JudgmentTag::Default);
                return Err(JudgmentError::MissingMeasurement {
                    tag: missing.to_string(),
                });
            }
        }

        let views: Vec<ArrayView4<'_, f32>> = parts.iter().map(|p| p.images.view()).collect();
        let images = concatenate(Axis(0), &views).map_err(|err| {
            JudgmentError::invalid_config("dataset.parts", err, "images could not be stacked")
        })?;

        let measurements: BTreeMap<JudgmentTag, Vec<f32>> = tags
            .into_iter()
            .map(|tag| {
                let joined: Vec<f32> = parts
                    .iter()
                    .flat_map(|p| p.measurements[&tag].iter().copied())
                    .collect();
                (tag, joined)
            })
            .collect();

        let total = images.len_of(Axis(0));
        tracing::info!(parts = parts.len(), samples = total, "concatenated datasets");
        Self::new(images, measurements)
    }

    /// Split dataset into train and validation sets
    ///
    /// # Arguments
    /// * `train_ratio` - Fraction of data to use for training (e.g., 0.8)
    ///
    /// Both halves must end up non-empty.
    pub fn split(&self, train_ratio: f32) -> JudgmentResult<(Self, Self)> {
        let split_idx = (self.len() as f32 * train_ratio) as usize;
        if !(0.0..=1.0).contains(&train_ratio) || split_idx == 0 || split_idx >= self.len() {
            return Err(JudgmentError::invalid_config(
                "train_ratio",
                train_ratio,
                format!("must leave samples on both sides of {} items", self.len()),
            ));
        }

        let take = |range: std::ops::Range<usize>| -> JudgmentResult<Self> {
            let images = self
                .images
                .slice_axis(Axis(0), Slice::from(range.clone()))
                .to_owned();
            let measurements = self
                .measurements
                .iter()
                .map(|(tag, values)| (*tag, values[range.clone()].to_vec()))
                .collect();
            Self::new(images, measurements)
        };

        Ok((take(0..split_idx)?, take(split_idx..self.len())?))
    }
}

/// Area of each image: the sum over pixels of the channel-mean intensity.
pub fn pixel_area(images: ArrayView4<'_, f32>) -> Array1<f32> {
    let depth = images.len_of(Axis(3)).max(1) as f32;
    images
        .axis_iter(Axis(0))
        .map(|image| image.sum() / depth)
        .collect()
}

#[derive(Serialize, Deserialize)]
struct DatasetCheckpoint {
    version: u32,
    images: Array4<f32>,
    measurements: BTreeMap<JudgmentTag, Vec<f32>>,
}

impl Checkpointable for StimulusDataset {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let snapshot = DatasetCheckpoint {
            version: DATASET_CHECKPOINT_VERSION,
            images: self.images.clone(),
            measurements: self.measurements.clone(),
        };
        Self::write_snapshot(&snapshot, path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let snapshot: DatasetCheckpoint = Self::read_snapshot(path)?;
        check_version(DATASET_CHECKPOINT_VERSION, snapshot.version)?;
        Self::new(snapshot.images, snapshot.measurements)
            .map_err(|err| CheckpointError::InvalidFormat(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squares(n: usize, side: usize) -> Array4<f32> {
        Array4::from_shape_fn((n, side, side, 3), |(i, y, x, _)| {
            if y <= i && x <= i {
                1.0
            } else {
                0.0
            }
        })
    }

    fn with_aa(n: usize) -> StimulusDataset {
        let mut measurements = BTreeMap::new();
        measurements.insert(JudgmentTag::AggregateArea, (0..n).map(|i| i as f32 * 2.0).collect());
        StimulusDataset::new(squares(n, 4), measurements).unwrap()
    }

    #[test]
    fn pixel_area_averages_channels() {
        let mut images = Array4::zeros((1, 2, 2, 3));
        images[[0, 0, 0, 0]] = 1.0;
        images[[0, 0, 0, 1]] = 1.0;
        images[[0, 0, 0, 2]] = 1.0;
        images[[0, 1, 1, 0]] = 0.6;
        let areas = pixel_area(images.view());
        assert!((areas[0] - 1.2).abs() < 1e-6);
    }

    #[test]
    fn mean_area_falls_back_to_pixel_area() {
        let dataset = with_aa(3);
        assert_eq!(dataset.measurements_for(JudgmentTag::MeanArea).unwrap(), vec![1.0, 4.0, 9.0]);
        assert_eq!(
            dataset.measurements_for(JudgmentTag::AggregateArea).unwrap(),
            vec![0.0, 2.0, 4.0]
        );
    }

    #[test]
    fn aggregate_area_has_no_fallback() {
        let dataset = StimulusDataset::from_images(squares(2, 4)).unwrap();
        assert!(matches!(
            dataset.measurements_for(JudgmentTag::AggregateArea),
            Err(JudgmentError::MissingMeasurement { .. })
        ));
    }

    #[test]
    fn measurement_count_must_match_images() {
        let mut measurements = BTreeMap::new();
        measurements.insert(JudgmentTag::MeanArea, vec![1.0]);
        let err = StimulusDataset::new(squares(2, 4), measurements).unwrap_err();
        assert!(matches!(err, JudgmentError::DimensionMismatch { .. }));
    }

    #[test]
    fn negative_measurements_are_rejected() {
        let mut measurements = BTreeMap::new();
        measurements.insert(JudgmentTag::MeanArea, vec![1.0, -2.0]);
        assert!(StimulusDataset::new(squares(2, 4), measurements).is_err());
    }

    #[test]
    fn concatenate_keeps_order() {
        let joined = StimulusDataset::concatenate(&[with_aa(2), with_aa(3)]).unwrap();
        assert_eq!(joined.len(), 5);
        assert_eq!(
            joined.measurements_for(JudgmentTag::AggregateArea).unwrap(),
            vec![0.0, 2.0, 0.0, 2.0, 4.0]
        );
    }

    #[test]
    fn concatenate_rejects_mixed_shapes() {
        let small = StimulusDataset::from_images(squares(1, 4)).unwrap();
        let large = StimulusDataset::from_images(squares(1, 8)).unwrap();
        let err = StimulusDataset::concatenate(&[small, large]).unwrap_err();
        assert!(matches!(err, JudgmentError::ShapeMismatch { .. }));
    }

    #[test]
    fn split_partitions_samples() {
        let (train, val) = with_aa(4).split(0.75).unwrap();
        assert_eq!(train.len(), 3);
        assert_eq!(val.len(), 1);
        assert_eq!(val.measurements_for(JudgmentTag::AggregateArea).unwrap(), vec![6.0]);
        assert!(with_aa(4).split(1.0).is_err());
    }

    #[test]
    fn checkpoint_roundtrip() {
        let dataset = with_aa(3);
        let path = std::env::temp_dir().join(format!("stimuli_{}.bin", uuid::Uuid::new_v4()));
        dataset.save_checkpoint(&path).expect("save checkpoint");
        let restored = StimulusDataset::load_checkpoint(&path).expect("load checkpoint");
        std::fs::remove_file(&path).ok();
        assert_eq!(restored, dataset);
    }
}
