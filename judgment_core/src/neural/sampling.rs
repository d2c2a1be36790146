//! 2×2 max pooling and nearest-neighbour upsampling.
//!
//! Spatial sizes are always even here; [`EncoderArchitecture`] rejects inputs
//! that cannot be halved once per stage.
//!
//! [`EncoderArchitecture`]: super::architecture::EncoderArchitecture

use ndarray::Array3;

use super::architecture::POOL_FACTOR;

/// Pooled map plus the flat window offset (`dy * 2 + dx`) of each maximum.
#[derive(Debug, Clone)]
pub struct PoolOutput {
    pub pooled: Array3<f32>,
    pub argmax: Array3<u8>,
}

pub fn max_pool(input: &Array3<f32>) -> PoolOutput {
    let (height, width, channels) = input.dim();
    let shape = (height / POOL_FACTOR, width / POOL_FACTOR, channels);
    let mut pooled = Array3::zeros(shape);
    let mut argmax = Array3::zeros(shape);

    for ((y, x, c), value) in pooled.indexed_iter_mut() {
        let mut best = f32::NEG_INFINITY;
        let mut best_offset = 0u8;
        for dy in 0..POOL_FACTOR {
            for dx in 0..POOL_FACTOR {
                let candidate = input[[y * POOL_FACTOR + dy, x * POOL_FACTOR + dx, c]];
                if candidate > best {
                    best = candidate;
                    best_offset = (dy * POOL_FACTOR + dx) as u8;
                }
            }
        }
        *value = best;
        argmax[[y, x, c]] = best_offset;
    }

    PoolOutput { pooled, argmax }
}

/// Routes each pooled gradient back to the position that won the max.
pub fn max_pool_backward(grad_output: &Array3<f32>, argmax: &Array3<u8>) -> Array3<f32> {
    let (height, width, channels) = grad_output.dim();
    let mut grad_input = Array3::zeros((height * POOL_FACTOR, width * POOL_FACTOR, channels));

    for ((y, x, c), &grad) in grad_output.indexed_iter() {
        let offset = argmax[[y, x, c]] as usize;
        let dy = offset / POOL_FACTOR;
        let dx = offset % POOL_FACTOR;
        grad_input[[y * POOL_FACTOR + dy, x * POOL_FACTOR + dx, c]] += grad;
    }

    grad_input
}

pub fn upsample(input: &Array3<f32>) -> Array3<f32> {
    let (height, width, channels) = input.dim();
    Array3::from_shape_fn(
        (height * POOL_FACTOR, width * POOL_FACTOR, channels),
        |(y, x, c)| input[[y / POOL_FACTOR, x / POOL_FACTOR, c]],
    )
}

/// Sums each upsampled block's gradient back onto its source cell.
pub fn upsample_backward(grad_output: &Array3<f32>) -> Array3<f32> {
    let (height, width, channels) = grad_output.dim();
    let mut grad_input = Array3::zeros((height / POOL_FACTOR, width / POOL_FACTOR, channels));
    for ((y, x, c), &grad) in grad_output.indexed_iter() {
        grad_input[[y / POOL_FACTOR, x / POOL_FACTOR, c]] += grad;
    }
    grad_input
}
