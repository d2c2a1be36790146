//! Translating a head's binary output row back into a scalar judgment.
//!
//! The decoder takes the greatest active index and returns the matching
//! reference. Rows that are not clean staircases are decoded by the same
//! rule; no voting across units is attempted.

use ndarray::{ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::labels::split_point;
use super::ladder::ThresholdLadder;
use crate::error::{JudgmentError, JudgmentResult};

/// What to report for a row with no active unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecodePolicy {
    /// Report the lowest reference and mark the judgment as floored.
    #[default]
    LowestReference,
    /// Fail with [`JudgmentError::DecodeAmbiguity`].
    Reject,
}

/// A decoded judgment and the unit it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedJudgment {
    pub value: f32,
    /// `None` when the row was empty and the value is the policy floor.
    pub index: Option<usize>,
}

impl DecodedJudgment {
    pub fn is_floored(&self) -> bool {
        self.index.is_none()
    }
}

/// Decodes a single output row; `row_index` only labels errors.
pub fn decode_response(
    row: ArrayView1<'_, u8>,
    ladder: &ThresholdLadder,
    policy: DecodePolicy,
    row_index: usize,
) -> JudgmentResult<DecodedJudgment> {
    if row.len() != ladder.len() {
        return Err(JudgmentError::shape_mismatch(
            format!("response row {row_index}"),
            &[ladder.len()],
            &[row.len()],
        ));
    }

    match split_point(row) {
        Some(index) => Ok(DecodedJudgment {
            value: ladder[index],
            index: Some(index),
        }),
        None => match policy {
            DecodePolicy::LowestReference => {
                tracing::warn!(
                    row = row_index,
                    floor = ladder.lowest(),
                    "response row has no active unit; reporting lowest reference"
                );
                Ok(DecodedJudgment {
                    value: ladder.lowest(),
                    index: None,
                })
            }
            DecodePolicy::Reject => Err(JudgmentError::DecodeAmbiguity { row: row_index }),
        },
    }
}

/// Decodes every row of a prediction matrix, stopping at the first failure.
pub fn decode_rows(
    rows: ArrayView2<'_, u8>,
    ladder: &ThresholdLadder,
    policy: DecodePolicy,
) -> JudgmentResult<Vec<DecodedJudgment>> {
    rows.axis_iter(Axis(0))
        .enumerate()
        .map(|(index, row)| decode_response(row, ladder, policy, index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::labels::encode_labels;
    use ndarray::{arr1, arr2, Array1};

    fn ladder() -> ThresholdLadder {
        ThresholdLadder::build(100.0, 5).unwrap()
    }

    #[test]
    fn staircase_row_decodes_to_its_split_reference() {
        let ladder = ladder();
        for split in 0..ladder.len() {
            let row = Array1::from_shape_fn(ladder.len(), |k| u8::from(k <= split));
            let decoded =
                decode_response(row.view(), &ladder, DecodePolicy::Reject, 0).unwrap();
            assert_eq!(decoded.value, ladder[split]);
            assert_eq!(decoded.index, Some(split));
        }
    }

    #[test]
    fn encode_then_decode_scenario() {
        let ladder = ladder();
        let labels = encode_labels(&[55.0], &ladder);
        let decoded =
            decode_response(labels.row(0), &ladder, DecodePolicy::default(), 0).unwrap();
        assert_eq!(decoded.value, 40.0);
    }

    #[test]
    fn all_zero_row_floors_under_lenient_policy() {
        let ladder = ladder();
        let decoded = decode_response(
            arr1(&[0u8, 0, 0, 0, 0]).view(),
            &ladder,
            DecodePolicy::LowestReference,
            3,
        )
        .unwrap();
        assert_eq!(decoded.value, ladder[0]);
        assert!(decoded.is_floored());
    }

    #[test]
    fn all_zero_row_is_rejected_under_strict_policy() {
        let err = decode_response(
            arr1(&[0u8, 0, 0, 0, 0]).view(),
            &ladder(),
            DecodePolicy::Reject,
            7,
        )
        .unwrap_err();
        assert!(matches!(err, JudgmentError::DecodeAmbiguity { row: 7 }));
    }

    #[test]
    fn non_staircase_row_uses_greatest_active_index() {
        let decoded = decode_response(
            arr1(&[0u8, 1, 0, 1, 0]).view(),
            &ladder(),
            DecodePolicy::Reject,
            0,
        )
        .unwrap();
        assert_eq!(decoded.value, 60.0);
        assert_eq!(decoded.index, Some(3));
    }

    #[test]
    fn all_ones_row_decodes_to_top_reference() {
        let decoded = decode_response(
            arr1(&[1u8, 1, 1, 1, 1]).view(),
            &ladder(),
            DecodePolicy::Reject,
            0,
        )
        .unwrap();
        assert_eq!(decoded.value, 80.0);
    }

    #[test]
    fn row_length_must_match_ladder() {
        let err = decode_response(
            arr1(&[1u8, 0]).view(),
            &ladder(),
            DecodePolicy::default(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, JudgmentError::ShapeMismatch { .. }));
    }

    #[test]
    fn decode_rows_stops_at_first_rejected_row() {
        let rows = arr2(&[[1u8, 1, 0, 0, 0], [0, 0, 0, 0, 0], [1, 0, 0, 0, 0]]);
        let err = decode_rows(rows.view(), &ladder(), DecodePolicy::Reject).unwrap_err();
        assert!(matches!(err, JudgmentError::DecodeAmbiguity { row: 1 }));

        let decoded = decode_rows(rows.view(), &ladder(), DecodePolicy::LowestReference).unwrap();
        let values: Vec<f32> = decoded.iter().map(|d| d.value).collect();
        assert_eq!(values, vec![20.0, 0.0, 0.0]);
    }
}
