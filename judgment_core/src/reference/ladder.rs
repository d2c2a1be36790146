//! Evenly spaced reference values spanning a measurement range.

use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::error::{JudgmentError, JudgmentResult};

/// Ordered reference values `ref[i] = i * (total_range / count)`.
///
/// The ladder is immutable once built. It doubles as the decode key of the
/// head trained against it, so it is persisted next to the model.
///
/// # Examples
///
/// ```
/// use judgment_core::reference::ThresholdLadder;
///
/// let ladder = ThresholdLadder::build(100.0, 5).unwrap();
/// assert_eq!(ladder.values(), &[0.0, 20.0, 40.0, 60.0, 80.0]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdLadder {
    values: Vec<f32>,
}

impl ThresholdLadder {
    /// Builds `count` references from zero up to (excluding) `total_range`.
    ///
    /// Fails with [`JudgmentError::InvalidConfiguration`] when `count` is zero
    /// or `total_range` is negative or not finite.
    pub fn build(total_range: f32, count: usize) -> JudgmentResult<Self> {
        if count == 0 {
            return Err(JudgmentError::invalid_config(
                "references",
                count,
                "threshold count must be at least 1",
            ));
        }
        if !total_range.is_finite() || total_range < 0.0 {
            return Err(JudgmentError::invalid_config(
                "total_range",
                total_range,
                "range must be finite and non-negative",
            ));
        }

        let step = total_range / count as f32;
        let values = (0..count).map(|i| i as f32 * step).collect();
        Ok(Self { values })
    }

    /// Ladder spanning the side length squared of a square-ish image.
    pub fn for_image_area(height: usize, width: usize, count: usize) -> JudgmentResult<Self> {
        Self::build((height * width) as f32, count)
    }

    /// Ladder spanning the largest observed measurement.
    pub fn for_max_observed(measurements: &[f32], count: usize) -> JudgmentResult<Self> {
        let max = measurements
            .iter()
            .copied()
            .filter(|value| value.is_finite())
            .fold(0.0f32, f32::max);
        Self::build(max, count)
    }

    /// Rebuilds a ladder from persisted values, rejecting unsorted input.
    pub fn from_values(values: Vec<f32>) -> JudgmentResult<Self> {
        if values.is_empty() {
            return Err(JudgmentError::invalid_config(
                "ladder",
                "[]",
                "a ladder needs at least one reference",
            ));
        }
        if values.windows(2).any(|pair| !(pair[0] <= pair[1])) {
            return Err(JudgmentError::invalid_config(
                "ladder",
                format!("{values:?}"),
                "references must be non-decreasing",
            ));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Number of references (K), which is also the head's unit count.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Lowest reference, the floor used by the lenient decode policy.
    pub fn lowest(&self) -> f32 {
        self.values.first().copied().unwrap_or(0.0)
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }
}

impl Index<usize> for ThresholdLadder {
    type Output = f32;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}
