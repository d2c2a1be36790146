use crate::error::{JudgmentError, JudgmentResult};
use crate::neural::WeightList;

use super::classifier::ThresholdClassifier;

/// Copies the first `prefix_len` weight tensors of `source` into `target` and
/// freezes them.
///
/// Both models must declare `prefix_len` as their encoder prefix length and
/// agree on every prefix tensor shape; otherwise this fails with
/// [`JudgmentError::ShapeMismatch`] and `target` is left untouched. The source
/// is only read. Applying the same transplant twice yields the same weights.
pub fn transplant<S: WeightList + ?Sized>(
    source: &S,
    target: &mut ThresholdClassifier,
    prefix_len: usize,
) -> JudgmentResult<()> {
    let source_weights = source.weights();
    for found in [source.prefix_len(), target.prefix_len()] {
        if found != prefix_len {
            return Err(JudgmentError::shape_mismatch(
                "encoder prefix length",
                &[prefix_len],
                &[found],
            ));
        }
    }
    if source_weights.len() < prefix_len {
        return Err(JudgmentError::shape_mismatch(
            "encoder prefix length",
            &[prefix_len],
            &[source_weights.len()],
        ));
    }

    let prefix = &source_weights[..prefix_len];
    for (index, (incoming, expected)) in prefix
        .iter()
        .zip(target.weight_shapes().iter())
        .enumerate()
    {
        if incoming.shape() != expected.as_slice() {
            return Err(JudgmentError::shape_mismatch(
                format!("encoder tensor {index}"),
                expected,
                incoming.shape(),
            ));
        }
    }

    target.write_prefix(prefix)?;
    target.freeze_prefix();
    tracing::info!(tag = %target.tag(), prefix_len, "transplanted encoder prefix");
    Ok(())
}
