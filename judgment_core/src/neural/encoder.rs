//! Convolutional encoder stage: `(Conv3×3 ReLU → MaxPool2×2)` per stage.

use ndarray::{Array1, Array2, Array3, Array4, ArrayD, ArrayView4, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::architecture::{EncoderArchitecture, LayerRole};
use super::conv::{check_shape, Activation, Conv2d};
use super::sampling::{max_pool, max_pool_backward, PoolOutput};
use crate::error::{JudgmentError, JudgmentResult};

/// Intermediate maps kept from a forward pass for backpropagation.
pub(crate) struct EncoderTrace {
    /// Input of each convolution
    inputs: Vec<Array3<f32>>,
    /// Activated output of each convolution (pre-pool)
    outputs: Vec<Array3<f32>>,
    pools: Vec<PoolOutput>,
}

impl EncoderTrace {
    pub(crate) fn embedding(&self) -> &Array3<f32> {
        &self.pools[self.pools.len() - 1].pooled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoder {
    convs: Vec<Conv2d>,
}

impl Encoder {
    pub fn new(architecture: &EncoderArchitecture, seed: u64) -> Self {
        let convs = architecture
            .encoder_roles()
            .into_iter()
            .filter_map(|role| match role {
                LayerRole::EncoderConv {
                    in_channels,
                    out_channels,
                } => Some((in_channels, out_channels)),
                _ => None,
            })
            .enumerate()
            .map(|(stage, (cin, cout))| {
                Conv2d::new(cin, cout, Activation::Relu, seed.wrapping_add(stage as u64))
            })
            .collect();

        Self { convs }
    }

    pub fn convs(&self) -> &[Conv2d] {
        &self.convs
    }

    pub(crate) fn convs_mut(&mut self) -> &mut [Conv2d] {
        &mut self.convs
    }

    /// Encoder output for one `H×W×C` image.
    pub fn encode(&self, image: &Array3<f32>) -> Array3<f32> {
        self.convs.iter().fold(image.clone(), |x, conv| {
            max_pool(&conv.forward(&x)).pooled
        })
    }

    /// Flattened embeddings, one row per image.
    pub fn encode_batch(&self, images: ArrayView4<'_, f32>) -> Array2<f32> {
        let rows: Vec<Array1<f32>> = (0..images.len_of(Axis(0)))
            .into_par_iter()
            .map(|n| {
                let image = images.index_axis(Axis(0), n).to_owned();
                self.encode(&image).iter().copied().collect()
            })
            .collect();

        let width = rows.first().map(Array1::len).unwrap_or(0);
        let mut embeddings = Array2::zeros((rows.len(), width));
        for (mut target, row) in embeddings.axis_iter_mut(Axis(0)).zip(rows.iter()) {
            target.assign(row);
        }
        embeddings
    }

    pub(crate) fn forward_traced(&self, image: &Array3<f32>) -> EncoderTrace {
        let mut inputs = Vec::with_capacity(self.convs.len());
        let mut outputs = Vec::with_capacity(self.convs.len());
        let mut pools = Vec::with_capacity(self.convs.len());

        let mut x = image.clone();
        for conv in &self.convs {
            let out = conv.forward(&x);
            let pooled = max_pool(&out);
            inputs.push(x);
            x = pooled.pooled.clone();
            outputs.push(out);
            pools.push(pooled);
        }

        EncoderTrace {
            inputs,
            outputs,
            pools,
        }
    }

    /// Parameter gradients `(kernel, bias)` per convolution, in stage order.
    pub(crate) fn backward(
        &self,
        trace: &EncoderTrace,
        grad_embedding: Array3<f32>,
    ) -> Vec<(Array4<f32>, Array1<f32>)> {
        let mut grads = Vec::with_capacity(self.convs.len());
        let mut grad = grad_embedding;
        for (stage, conv) in self.convs.iter().enumerate().rev() {
            let grad_conv = max_pool_backward(&grad, &trace.pools[stage].argmax);
            let step = conv.backward(&trace.inputs[stage], &trace.outputs[stage], &grad_conv);
            grad = step.input;
            grads.push((step.kernel, step.bias));
        }
        grads.reverse();
        grads
    }

    /// Kernel and bias of each stage, in weight-list order.
    pub fn weight_tensors(&self) -> Vec<ArrayD<f32>> {
        self.convs.iter().flat_map(Conv2d::weight_tensors).collect()
    }

    pub fn tensor_count(&self) -> usize {
        self.convs.len() * 2
    }

    /// Overwrites every stage, or nothing if any shape differs.
    pub(crate) fn load_tensors(&mut self, tensors: &[ArrayD<f32>]) -> JudgmentResult<()> {
        if tensors.len() != self.tensor_count() {
            return Err(JudgmentError::shape_mismatch(
                "encoder prefix length",
                &[self.tensor_count()],
                &[tensors.len()],
            ));
        }
        for (index, (current, incoming)) in self
            .weight_tensors()
            .iter()
            .zip(tensors.iter())
            .enumerate()
        {
            check_shape(
                &format!("encoder tensor {index}"),
                current.shape(),
                incoming.shape(),
            )?;
        }

        for (conv, pair) in self.convs.iter_mut().zip(tensors.chunks_exact(2)) {
            conv.load_tensors(&pair[0], &pair[1])?;
        }
        Ok(())
    }

    /// True when the stage shapes match what `architecture` declares.
    pub fn matches(&self, architecture: &EncoderArchitecture) -> bool {
        let shapes: Vec<Vec<usize>> = self
            .weight_tensors()
            .iter()
            .map(|t| t.shape().to_vec())
            .collect();
        shapes == architecture.prefix_shapes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn architecture() -> EncoderArchitecture {
        EncoderArchitecture::new((8, 8, 3), vec![4, 2]).unwrap()
    }

    #[test]
    fn encoder_follows_architecture() {
        let arch = architecture();
        let encoder = Encoder::new(&arch, 1);
        assert_eq!(encoder.tensor_count(), arch.prefix_len());
        assert!(encoder.matches(&arch));
    }

    #[test]
    fn embeddings_have_architecture_length() {
        let arch = architecture();
        let encoder = Encoder::new(&arch, 1);
        let images = Array4::from_shape_fn((3, 8, 8, 3), |(n, y, x, c)| {
            ((n + y * x + c) % 4) as f32 / 4.0
        });
        let embeddings = encoder.encode_batch(images.view());
        assert_eq!(embeddings.dim(), (3, arch.embedding_len()));

        let single = encoder.encode(&images.index_axis(Axis(0), 1).to_owned());
        let flat: Vec<f32> = single.iter().copied().collect();
        assert_eq!(embeddings.row(1).to_vec(), flat);
    }

    #[test]
    fn load_is_all_or_nothing() {
        let arch = architecture();
        let mut encoder = Encoder::new(&arch, 1);
        let before = encoder.clone();

        let mut tensors = Encoder::new(&arch, 99).weight_tensors();
        tensors[3] = ArrayD::zeros(vec![7]);
        assert!(encoder.load_tensors(&tensors).is_err());
        assert_eq!(encoder, before);
    }

    #[test]
    fn backward_produces_one_gradient_pair_per_stage() {
        let arch = architecture();
        let encoder = Encoder::new(&arch, 4);
        let image = Array3::from_elem((8, 8, 3), 0.5);
        let trace = encoder.forward_traced(&image);
        assert_eq!(trace.embedding(), &encoder.encode(&image));

        let grads = encoder.backward(&trace, Array3::ones(trace.embedding().dim()));
        assert_eq!(grads.len(), 2);
        assert_eq!(grads[0].0.dim(), (3, 3, 3, 4));
        assert_eq!(grads[1].1.len(), 2);
    }
}
