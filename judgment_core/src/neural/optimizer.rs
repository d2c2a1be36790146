//! Adam optimizer over named parameter tensors.
//!
//! Only parameters passed to [`AdamOptimizer::step`] are ever touched. Frozen
//! tensors are kept out of the update set by never being registered, rather
//! than by a zero learning rate.

use std::collections::HashMap;

use ndarray::{Array, Dimension, IxDyn, Zip};

/// Adam optimizer (Adaptive Moment Estimation).
///
/// Implements the update rule:
/// ```text
/// m = beta1 * m + (1 - beta1) * g
/// v = beta2 * v + (1 - beta2) * g^2
/// param -= lr * m_hat / (sqrt(v_hat) + epsilon)
/// ```
#[derive(Debug, Clone)]
pub struct AdamOptimizer {
    /// Learning rate
    pub learning_rate: f32,
    /// Exponential decay rate for first moment (typically 0.9)
    pub beta1: f32,
    /// Exponential decay rate for second moment (typically 0.999)
    pub beta2: f32,
    /// Small constant for numerical stability
    pub epsilon: f32,
    first_moments: HashMap<String, Array<f32, IxDyn>>,
    second_moments: HashMap<String, Array<f32, IxDyn>>,
    /// Step counter per parameter, for bias correction
    steps: HashMap<String, i32>,
}

impl AdamOptimizer {
    /// Creates an optimizer with the usual Keras defaults for the betas.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            first_moments: HashMap::new(),
            second_moments: HashMap::new(),
            steps: HashMap::new(),
        }
    }

    /// Updates `param` in place from `gradient`.
    ///
    /// # Arguments
    ///
    /// * `param_name` - Unique identifier for this parameter
    /// * `param` - Parameter tensor to update (modified in-place)
    /// * `gradient` - Gradient tensor of the same shape
    pub fn step<D: Dimension>(
        &mut self,
        param_name: &str,
        param: &mut Array<f32, D>,
        gradient: &Array<f32, D>,
    ) {
        let shape = param.shape().to_vec();
        let m = self
            .first_moments
            .entry(param_name.to_string())
            .or_insert_with(|| Array::zeros(IxDyn(&shape)));
        let v = self
            .second_moments
            .entry(param_name.to_string())
            .or_insert_with(|| Array::zeros(IxDyn(&shape)));
        let t = self.steps.entry(param_name.to_string()).or_insert(0);
        *t += 1;

        let (beta1, beta2) = (self.beta1, self.beta2);
        let correction1 = 1.0 - beta1.powi(*t);
        let correction2 = 1.0 - beta2.powi(*t);
        let lr = self.learning_rate;
        let epsilon = self.epsilon;

        Zip::from(param.view_mut().into_dyn())
            .and(gradient.view().into_dyn())
            .and(m.view_mut())
            .and(v.view_mut())
            .for_each(|p, &g, m, v| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / correction1;
                let v_hat = *v / correction2;
                *p -= lr * m_hat / (v_hat.sqrt() + epsilon);
            });
    }

    /// Names of every parameter this optimizer has updated.
    pub fn parameter_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resets all accumulated moments.
    pub fn reset(&mut self) {
        self.first_moments.clear();
        self.second_moments.clear();
        self.steps.clear();
    }
}
