//! Binary cross-entropy losses for reconstruction and threshold targets.

use ndarray::{Array, ArrayView, Dimension, Zip};

/// Probabilities are clamped into `[EPSILON, 1 - EPSILON]` before the log.
pub const EPSILON: f32 = 1e-7;

/// Mean binary cross-entropy and its gradient w.r.t. `predicted`.
///
/// # Arguments
///
/// * `predicted` - Probabilities in `[0, 1]`
/// * `target` - Targets in `[0, 1]`, same shape as `predicted`
///
/// # Returns
///
/// Tuple of (loss value, gradient w.r.t. predicted)
pub fn binary_cross_entropy<D: Dimension>(
    predicted: ArrayView<'_, f32, D>,
    target: ArrayView<'_, f32, D>,
) -> (f32, Array<f32, D>) {
    assert_eq!(predicted.shape(), target.shape(), "shape mismatch for BCE");
    let n = predicted.len().max(1) as f32;

    let mut total = 0.0f32;
    let gradient = Zip::from(&predicted)
        .and(&target)
        .map_collect(|&p, &y| {
            let p = p.clamp(EPSILON, 1.0 - EPSILON);
            total -= y * p.ln() + (1.0 - y) * (1.0 - p).ln();
            (p - y) / (p * (1.0 - p)) / n
        });

    (total / n, gradient)
}

/// Mean binary cross-entropy where `predicted` came out of a sigmoid.
///
/// Returns the gradient w.r.t. the pre-sigmoid logits, `(p - y) / n`, which
/// avoids dividing by `p (1 - p)` when the sigmoid saturates.
pub fn sigmoid_cross_entropy<D: Dimension>(
    predicted: ArrayView<'_, f32, D>,
    target: ArrayView<'_, f32, D>,
) -> (f32, Array<f32, D>) {
    assert_eq!(predicted.shape(), target.shape(), "shape mismatch for BCE");
    let n = predicted.len().max(1) as f32;

    let mut total = 0.0f32;
    let gradient = Zip::from(&predicted)
        .and(&target)
        .map_collect(|&p, &y| {
            let clamped = p.clamp(EPSILON, 1.0 - EPSILON);
            total -= y * clamped.ln() + (1.0 - y) * (1.0 - clamped).ln();
            (p - y) / n
        });

    (total / n, gradient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn perfect_prediction_has_near_zero_loss() {
        let target = arr1(&[1.0f32, 0.0, 1.0]);
        let (loss, _) = binary_cross_entropy(target.view(), target.view());
        assert!(loss < 1e-5);
    }

    #[test]
    fn uniform_prediction_costs_ln_two() {
        let predicted = arr1(&[0.5f32, 0.5]);
        let target = arr1(&[1.0f32, 0.0]);
        let (loss, gradient) = binary_cross_entropy(predicted.view(), target.view());
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-5);
        assert!(gradient[0] < 0.0);
        assert!(gradient[1] > 0.0);
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let target = arr1(&[1.0f32, 0.0, 1.0, 0.0]);
        let predicted = arr1(&[0.3f32, 0.6, 0.8, 0.1]);
        let (_, gradient) = binary_cross_entropy(predicted.view(), target.view());

        let eps = 1e-3;
        let mut plus = predicted.clone();
        plus[1] += eps;
        let mut minus = predicted.clone();
        minus[1] -= eps;
        let (lp, _) = binary_cross_entropy(plus.view(), target.view());
        let (lm, _) = binary_cross_entropy(minus.view(), target.view());
        let numeric = (lp - lm) / (2.0 * eps);
        assert!((numeric - gradient[1]).abs() < 1e-2);
    }

    #[test]
    fn sigmoid_variant_returns_logit_gradient() {
        let predicted = arr1(&[0.75f32, 0.25]);
        let target = arr1(&[1.0f32, 1.0]);
        let (_, gradient) = sigmoid_cross_entropy(predicted.view(), target.view());
        assert!((gradient[0] + 0.125).abs() < 1e-6);
        assert!((gradient[1] + 0.375).abs() < 1e-6);
    }
}
