//! Same-padded 3×3 convolution over `H×W×C` feature maps.

use ndarray::{s, Array1, Array3, Array4, ArrayD, Axis, Ix1, Ix4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::architecture::KERNEL_SIZE;
use crate::error::{JudgmentError, JudgmentResult};

const PAD: isize = (KERNEL_SIZE / 2) as isize;

/// Pointwise nonlinearity applied after the convolution sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply(&self, x: f32) -> f32 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }

    /// Derivative expressed through the activation's output.
    fn derivative_from_output(&self, y: f32) -> f32 {
        match self {
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => y * (1.0 - y),
        }
    }
}

/// Gradients of one convolution with respect to its input and parameters.
#[derive(Debug, Clone)]
pub struct ConvGradients {
    pub input: Array3<f32>,
    pub kernel: Array4<f32>,
    pub bias: Array1<f32>,
}

/// Convolution with kernel `[3, 3, in, out]` and bias `[out]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2d {
    pub kernel: Array4<f32>,
    pub bias: Array1<f32>,
    pub activation: Activation,
}

impl Conv2d {
    /// He-style uniform initialization, zero bias.
    pub fn new(in_channels: usize, out_channels: usize, activation: Activation, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let fan_in = (KERNEL_SIZE * KERNEL_SIZE * in_channels) as f32;
        let scale = (2.0 / fan_in).sqrt();
        let kernel = Array4::from_shape_fn(
            (KERNEL_SIZE, KERNEL_SIZE, in_channels, out_channels),
            |_| (rng.gen::<f32>() - 0.5) * 2.0 * scale,
        );

        Self {
            kernel,
            bias: Array1::zeros(out_channels),
            activation,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.kernel.dim().2
    }

    pub fn out_channels(&self) -> usize {
        self.bias.len()
    }

    /// Returns the activated output map, same spatial size as `input`.
    pub fn forward(&self, input: &Array3<f32>) -> Array3<f32> {
        let (height, width, _) = input.dim();
        let mut output = Array3::zeros((height, width, self.out_channels()));

        for y in 0..height {
            for x in 0..width {
                let mut acc = self.bias.clone();
                for (ky, kx, iy, ix) in taps(y, x, height, width) {
                    let pixel = input.slice(s![iy, ix, ..]);
                    let weights = self.kernel.slice(s![ky, kx, .., ..]);
                    acc += &pixel.dot(&weights);
                }
                let activation = self.activation;
                output
                    .slice_mut(s![y, x, ..])
                    .assign(&acc.mapv(|v| activation.apply(v)));
            }
        }

        output
    }

    /// Backpropagates `grad_output` (w.r.t. the activated output).
    pub fn backward(
        &self,
        input: &Array3<f32>,
        output: &Array3<f32>,
        grad_output: &Array3<f32>,
    ) -> ConvGradients {
        let activation = self.activation;
        let mut grad_pre = grad_output.clone();
        grad_pre.zip_mut_with(output, |g, &y| *g *= activation.derivative_from_output(y));

        self.backward_pre_activation(input, &grad_pre)
    }

    /// Backpropagates a gradient already taken w.r.t. the pre-activation sum.
    pub fn backward_pre_activation(
        &self,
        input: &Array3<f32>,
        grad_pre: &Array3<f32>,
    ) -> ConvGradients {
        let (height, width, _) = input.dim();
        let mut grad_input = Array3::zeros(input.dim());
        let mut grad_kernel = Array4::zeros(self.kernel.dim());
        let mut grad_bias = Array1::zeros(self.bias.dim());

        for y in 0..height {
            for x in 0..width {
                let g = grad_pre.slice(s![y, x, ..]);
                grad_bias += &g;
                let g_row = g.insert_axis(Axis(0));
                for (ky, kx, iy, ix) in taps(y, x, height, width) {
                    let pixel = input.slice(s![iy, ix, ..]);
                    let outer = pixel.insert_axis(Axis(1)).dot(&g_row);
                    let mut slot = grad_kernel.slice_mut(s![ky, kx, .., ..]);
                    slot += &outer;

                    let weights = self.kernel.slice(s![ky, kx, .., ..]);
                    let mut back = grad_input.slice_mut(s![iy, ix, ..]);
                    back += &weights.dot(&g);
                }
            }
        }

        ConvGradients {
            input: grad_input,
            kernel: grad_kernel,
            bias: grad_bias,
        }
    }

    /// Kernel then bias, as dynamic-rank copies.
    pub fn weight_tensors(&self) -> [ArrayD<f32>; 2] {
        [self.kernel.clone().into_dyn(), self.bias.clone().into_dyn()]
    }

    /// Replaces kernel and bias after checking both shapes.
    pub fn load_tensors(&mut self, kernel: &ArrayD<f32>, bias: &ArrayD<f32>) -> JudgmentResult<()> {
        check_shape("convolution kernel", self.kernel.shape(), kernel.shape())?;
        check_shape("convolution bias", self.bias.shape(), bias.shape())?;

        let kernel = kernel
            .clone()
            .into_dimensionality::<Ix4>()
            .map_err(|err| JudgmentError::invalid_config("convolution kernel", err, "rank 4 expected"))?;
        let bias = bias
            .clone()
            .into_dimensionality::<Ix1>()
            .map_err(|err| JudgmentError::invalid_config("convolution bias", err, "rank 1 expected"))?;

        self.kernel = kernel;
        self.bias = bias;
        Ok(())
    }
}

pub(crate) fn check_shape(context: &str, expected: &[usize], found: &[usize]) -> JudgmentResult<()> {
    if expected != found {
        return Err(JudgmentError::shape_mismatch(context, expected, found));
    }
    Ok(())
}

/// In-bounds kernel taps around `(y, x)` as `(ky, kx, iy, ix)`.
fn taps(
    y: usize,
    x: usize,
    height: usize,
    width: usize,
) -> impl Iterator<Item = (usize, usize, usize, usize)> {
    (0..KERNEL_SIZE).flat_map(move |ky| {
        (0..KERNEL_SIZE).filter_map(move |kx| {
            let iy = y as isize + ky as isize - PAD;
            let ix = x as isize + kx as isize - PAD;
            if iy < 0 || ix < 0 || iy >= height as isize || ix >= width as isize {
                None
            } else {
                Some((ky, kx, iy as usize, ix as usize))
            }
        })
    })
}
