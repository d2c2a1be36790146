//! Ordered weight lists, the view models expose for transplanting.

use ndarray::ArrayD;

/// A model whose parameters can be listed in a fixed order, encoder first.
///
/// The first [`prefix_len`](WeightList::prefix_len) entries are the
/// convolutional encoder stage shared between the autoencoder and every
/// classifier skeleton built from the same architecture.
pub trait WeightList {
    /// Copies of every weight tensor in architecture order.
    fn weights(&self) -> Vec<ArrayD<f32>>;

    /// Length of the encoder prefix declared by this model's architecture.
    fn prefix_len(&self) -> usize;

    fn weight_shapes(&self) -> Vec<Vec<usize>> {
        self.weights()
            .iter()
            .map(|tensor| tensor.shape().to_vec())
            .collect()
    }

    fn weight_count(&self) -> usize {
        self.weights().len()
    }
}
