//! Binary "exceeds threshold" targets for head training.

use ndarray::{Array2, ArrayView1, Axis};

use super::ladder::ThresholdLadder;

/// `N×K` matrix where `labels[[n, k]] == 1` iff `measurement[n] > ladder[k]`.
///
/// Because ladders are sorted ascending every row is a staircase: a run of
/// ones followed by a run of zeros.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMatrix {
    labels: Array2<u8>,
}

impl LabelMatrix {
    pub fn as_array(&self) -> &Array2<u8> {
        &self.labels
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, u8> {
        self.labels.row(index)
    }

    pub fn nrows(&self) -> usize {
        self.labels.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.labels.ncols()
    }

    /// Targets as floats for the loss function.
    pub fn to_targets(&self) -> Array2<f32> {
        self.labels.mapv(f32::from)
    }

    /// Index of the last one in each row, `None` for all-zero rows.
    pub fn split_points(&self) -> Vec<Option<usize>> {
        self.labels
            .axis_iter(Axis(0))
            .map(|row| split_point(row))
            .collect()
    }
}

/// Encodes one row per measurement against `ladder`.
///
/// Total over all inputs: NaN compares false everywhere and yields an
/// all-zero row, infinities saturate to all-one or all-zero rows.
pub fn encode_labels(measurements: &[f32], ladder: &ThresholdLadder) -> LabelMatrix {
    let references = ladder.values();
    let labels = Array2::from_shape_fn((measurements.len(), references.len()), |(n, k)| {
        u8::from(measurements[n] > references[k])
    });
    LabelMatrix { labels }
}

/// Greatest index holding a one.
pub fn split_point(row: ArrayView1<'_, u8>) -> Option<usize> {
    row.iter().rposition(|&bit| bit == 1)
}

/// True when `row` is ones followed by zeros (either run may be empty).
pub fn is_staircase(row: ArrayView1<'_, u8>) -> bool {
    row.iter()
        .zip(row.iter().skip(1))
        .all(|(&current, &next)| !(current == 0 && next == 1))
}
