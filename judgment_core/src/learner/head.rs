//! Dense projection + softmax + mean-threshold integerizing.
//!
//! The head maps a flattened embedding to `K` units. Softmax makes the units
//! compete, and [`integerize`] turns each activation row into a binary vector
//! by comparing every unit to the row's mean.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{JudgmentError, JudgmentResult};
use crate::neural::loss::binary_cross_entropy;
use crate::neural::LayerRole;

/// Trainable part of a threshold classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdHead {
    /// Bias-free projection weights `[units, inputs]`
    pub dense: Array2<f32>,
}

impl ThresholdHead {
    /// Xavier-style uniform initialization.
    pub fn new(inputs: usize, units: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let scale = (2.0 / (inputs + units).max(1) as f32).sqrt();
        let dense = Array2::from_shape_fn((units, inputs), |_| {
            (rng.gen::<f32>() - 0.5) * 2.0 * scale
        });
        Self { dense }
    }

    /// Head sized by a [`LayerRole::HeadDense`] entry of the architecture.
    pub fn for_role(role: LayerRole, seed: u64) -> JudgmentResult<Self> {
        match role {
            LayerRole::HeadDense { inputs, units } => Ok(Self::new(inputs, units, seed)),
            other => Err(JudgmentError::invalid_config(
                "head.role",
                format!("{other:?}"),
                "a threshold head is built from a HeadDense role",
            )),
        }
    }

    pub fn inputs(&self) -> usize {
        self.dense.ncols()
    }

    pub fn units(&self) -> usize {
        self.dense.nrows()
    }

    /// Softmax activations, one row per embedding row.
    pub fn activations(&self, embeddings: ArrayView2<'_, f32>) -> Array2<f32> {
        softmax_rows(&embeddings.dot(&self.dense.t()))
    }

    /// Binary outputs, one row per embedding row.
    pub fn predict(&self, embeddings: ArrayView2<'_, f32>) -> Array2<u8> {
        integerize_rows(self.activations(embeddings).view())
    }

    /// BCE of the softmax output against `targets`, and its gradient w.r.t.
    /// [`dense`](Self::dense).
    pub fn loss_and_gradient(
        &self,
        embeddings: ArrayView2<'_, f32>,
        targets: ArrayView2<'_, f32>,
    ) -> (f32, Array2<f32>) {
        let probabilities = self.activations(embeddings);
        let (loss, grad_probabilities) = binary_cross_entropy(probabilities.view(), targets);

        // softmax Jacobian: dz_i = p_i * (g_i - sum_j g_j p_j)
        let weighted = (&grad_probabilities * &probabilities).sum_axis(Axis(1));
        let mut grad_logits = grad_probabilities;
        grad_logits -= &weighted.insert_axis(Axis(1));
        grad_logits *= &probabilities;

        (loss, grad_logits.t().dot(&embeddings))
    }
}

fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    out
}

/// `1` where an activation is strictly above the row mean, else `0`.
///
/// ```
/// use judgment_core::learner::integerize;
/// use ndarray::arr1;
///
/// let bits = integerize(arr1(&[0.4f32, 0.3, 0.2, 0.1]).view());
/// assert_eq!(bits.to_vec(), vec![1, 1, 0, 0]);
/// ```
pub fn integerize(activations: ArrayView1<'_, f32>) -> Array1<u8> {
    let mean = activations.mean().unwrap_or(0.0);
    activations.mapv(|a| u8::from(a > mean))
}

pub fn integerize_rows(activations: ArrayView2<'_, f32>) -> Array2<u8> {
    let mut out = Array2::zeros(activations.dim());
    for (mut target, row) in out.axis_iter_mut(Axis(0)).zip(activations.axis_iter(Axis(0))) {
        target.assign(&integerize(row));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn activations_are_row_distributions() {
        let head = ThresholdHead::new(3, 4, 7);
        let embeddings = arr2(&[[1.0f32, 0.0, 2.0], [0.5, 0.5, 0.5]]);
        let probs = head.activations(embeddings.view());
        assert_eq!(probs.dim(), (2, 4));
        for row in probs.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn uniform_row_integerizes_to_zeros() {
        let bits = integerize(Array1::from_elem(5, 0.2f32).view());
        assert!(bits.iter().all(|&b| b == 0));
    }

    #[test]
    fn integerize_is_pure_per_row() {
        let rows = arr2(&[[0.7f32, 0.2, 0.1], [0.1, 0.1, 0.8]]);
        let bits = integerize_rows(rows.view());
        assert_eq!(bits, arr2(&[[1u8, 0, 0], [0, 0, 1]]));
    }

    #[test]
    fn head_is_sized_by_its_layer_role() {
        let role = LayerRole::HeadDense { inputs: 12, units: 5 };
        let head = ThresholdHead::for_role(role, 3).unwrap();
        assert_eq!(vec![head.dense.shape().to_vec()], role.tensor_shapes());

        let err = ThresholdHead::for_role(LayerRole::EncoderPool, 3).unwrap_err();
        assert!(matches!(err, JudgmentError::InvalidConfiguration { .. }));
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let head = ThresholdHead::new(3, 4, 11);
        let embeddings = arr2(&[[0.3f32, -0.2, 0.9], [1.0, 0.4, -0.5]]);
        let targets = arr2(&[[1.0f32, 1.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]]);
        let (_, grad) = head.loss_and_gradient(embeddings.view(), targets.view());

        let eps = 1e-3;
        for &(u, i) in &[(0usize, 0usize), (2, 1), (3, 2)] {
            let mut plus = head.clone();
            plus.dense[[u, i]] += eps;
            let mut minus = head.clone();
            minus.dense[[u, i]] -= eps;
            let numeric = (plus.loss_and_gradient(embeddings.view(), targets.view()).0
                - minus.loss_and_gradient(embeddings.view(), targets.view()).0)
                / (2.0 * eps);
            assert!(
                (numeric - grad[[u, i]]).abs() < 1e-2,
                "unit {u} input {i}: numeric {numeric} analytic {}",
                grad[[u, i]]
            );
        }
    }
}
