//! Convolutional reconstruction autoencoder and its training loop.
//!
//! The encoder half is the feature extractor later transplanted into
//! threshold classifiers; the decoder mirrors it and ends in a sigmoid
//! convolution back to the image channels.

use std::path::Path;
use std::time::Instant;

use ndarray::{Array1, Array3, Array4, ArrayD, ArrayView4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::architecture::{EncoderArchitecture, LayerRole};
use super::conv::{Activation, Conv2d};
use super::encoder::Encoder;
use super::loss::sigmoid_cross_entropy;
use super::optimizer::AdamOptimizer;
use super::sampling::{upsample, upsample_backward};
use super::weights::WeightList;
use crate::checkpoint::{check_version, CheckpointError, Checkpointable};
use crate::error::{JudgmentError, JudgmentResult};
use crate::logging::{record_epoch, EpochLog};

const AUTOENCODER_CHECKPOINT_VERSION: u32 = 1;

type ParamGrads = Vec<(Array4<f32>, Array1<f32>)>;

/// Decoder stages followed by the sigmoid output convolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decoder {
    convs: Vec<Conv2d>,
    output: Conv2d,
}

impl Decoder {
    pub fn new(architecture: &EncoderArchitecture, seed: u64) -> Self {
        let convs: Vec<Conv2d> = architecture
            .decoder_roles()
            .into_iter()
            .filter_map(|role| match role {
                LayerRole::DecoderConv {
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

        let in_channels = convs
            .last()
            .map(Conv2d::out_channels)
            .unwrap_or(architecture.input_shape.2);
        let output = Conv2d::new(
            in_channels,
            architecture.input_shape.2,
            Activation::Sigmoid,
            seed.wrapping_add(convs.len() as u64),
        );

        Self { convs, output }
    }

    pub fn decode(&self, embedding: &Array3<f32>) -> Array3<f32> {
        let expanded = self
            .convs
            .iter()
            .fold(embedding.clone(), |x, conv| upsample(&conv.forward(&x)));
        self.output.forward(&expanded)
    }

    fn weight_tensors(&self) -> Vec<ArrayD<f32>> {
        self.convs
            .iter()
            .chain(std::iter::once(&self.output))
            .flat_map(Conv2d::weight_tensors)
            .collect()
    }
}

/// Encoder plus decoder sharing one [`EncoderArchitecture`].
#[derive(Debug, Clone, PartialEq)]
pub struct Autoencoder {
    architecture: EncoderArchitecture,
    encoder: Encoder,
    decoder: Decoder,
}

impl Autoencoder {
    /// Freshly initialized autoencoder.
    pub fn new(architecture: EncoderArchitecture, seed: u64) -> Self {
        let encoder = Encoder::new(&architecture, seed);
        let decoder = Decoder::new(&architecture, seed.wrapping_add(10_000));
        Self {
            architecture,
            encoder,
            decoder,
        }
    }

    pub fn architecture(&self) -> &EncoderArchitecture {
        &self.architecture
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn encode(&self, image: &Array3<f32>) -> Array3<f32> {
        self.encoder.encode(image)
    }

    pub fn reconstruct(&self, image: &Array3<f32>) -> Array3<f32> {
        self.decoder.decode(&self.encoder.encode(image))
    }

    /// Mean reconstruction loss over a batch of images.
    pub fn reconstruction_loss(&self, images: ArrayView4<'_, f32>) -> f32 {
        let n = images.len_of(Axis(0));
        if n == 0 {
            return 0.0;
        }
        let total: f32 = (0..n)
            .into_par_iter()
            .map(|i| {
                let image = images.index_axis(Axis(0), i).to_owned();
                let reconstruction = self.reconstruct(&image);
                sigmoid_cross_entropy(reconstruction.view(), image.view()).0
            })
            .collect::<Vec<f32>>()
            .into_iter()
            .sum();
        total / n as f32
    }

    /// Loss and parameter gradients for one image, in weight-list order.
    fn sample_gradients(&self, image: &Array3<f32>) -> (f32, ParamGrads) {
        let trace = self.encoder.forward_traced(image);

        let mut decoder_inputs = Vec::with_capacity(self.decoder.convs.len());
        let mut decoder_outputs = Vec::with_capacity(self.decoder.convs.len());
        let mut x = trace.embedding().clone();
        for conv in &self.decoder.convs {
            let out = conv.forward(&x);
            let next = upsample(&out);
            decoder_inputs.push(x);
            decoder_outputs.push(out);
            x = next;
        }
        let reconstruction = self.decoder.output.forward(&x);

        let (loss, grad_logits) = sigmoid_cross_entropy(reconstruction.view(), image.view());
        let output_step = self.decoder.output.backward_pre_activation(&x, &grad_logits);

        let mut decoder_grads = Vec::with_capacity(self.decoder.convs.len() + 1);
        let mut grad = output_step.input;
        for (index, conv) in self.decoder.convs.iter().enumerate().rev() {
            let grad_conv = upsample_backward(&grad);
            let step = conv.backward(&decoder_inputs[index], &decoder_outputs[index], &grad_conv);
            grad = step.input;
            decoder_grads.push((step.kernel, step.bias));
        }
        decoder_grads.reverse();
        decoder_grads.push((output_step.kernel, output_step.bias));

        let mut grads = self.encoder.backward(&trace, grad);
        grads.extend(decoder_grads);
        (loss, grads)
    }

    fn apply_gradients(&mut self, grads: &ParamGrads, optimizer: &mut AdamOptimizer) {
        let convs = self
            .encoder
            .convs_mut()
            .iter_mut()
            .map(|conv| ("encoder", conv))
            .chain(self.decoder.convs.iter_mut().map(|conv| ("decoder", conv)))
            .chain(std::iter::once(("output", &mut self.decoder.output)));

        for (index, ((scope, conv), (grad_kernel, grad_bias))) in convs.zip(grads.iter()).enumerate()
        {
            optimizer.step(&format!("{scope}.{index}.kernel"), &mut conv.kernel, grad_kernel);
            optimizer.step(&format!("{scope}.{index}.bias"), &mut conv.bias, grad_bias);
        }
    }
}

impl WeightList for Autoencoder {
    fn weights(&self) -> Vec<ArrayD<f32>> {
        let mut weights = self.encoder.weight_tensors();
        weights.extend(self.decoder.weight_tensors());
        weights
    }

    fn prefix_len(&self) -> usize {
        self.architecture.prefix_len()
    }
}

#[derive(Serialize, Deserialize)]
struct AutoencoderCheckpoint {
    version: u32,
    architecture: EncoderArchitecture,
    encoder: Encoder,
    decoder: Decoder,
}

impl Checkpointable for Autoencoder {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let snapshot = AutoencoderCheckpoint {
            version: AUTOENCODER_CHECKPOINT_VERSION,
            architecture: self.architecture.clone(),
            encoder: self.encoder.clone(),
            decoder: self.decoder.clone(),
        };
        Self::write_snapshot(&snapshot, path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let snapshot: AutoencoderCheckpoint = Self::read_snapshot(path)?;
        check_version(AUTOENCODER_CHECKPOINT_VERSION, snapshot.version)?;

        if !snapshot.encoder.matches(&snapshot.architecture) {
            return Err(CheckpointError::InvalidFormat(
                "encoder tensors do not match the stored architecture".to_string(),
            ));
        }
        let fresh = Decoder::new(&snapshot.architecture, 0);
        let shapes = |decoder: &Decoder| -> Vec<Vec<usize>> {
            decoder
                .weight_tensors()
                .iter()
                .map(|t| t.shape().to_vec())
                .collect()
        };
        if shapes(&snapshot.decoder) != shapes(&fresh) {
            return Err(CheckpointError::InvalidFormat(
                "decoder tensors do not match the stored architecture".to_string(),
            ));
        }

        Ok(Self {
            architecture: snapshot.architecture,
            encoder: snapshot.encoder,
            decoder: snapshot.decoder,
        })
    }
}

/// Reconstruction training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoencoderTrainingConfig {
    /// Number of passes over the image set
    pub epochs: usize,
    /// Images per optimizer step
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f32,
    /// Seed for initialization and shuffling
    pub seed: u64,
}

impl Default for AutoencoderTrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 2,
            batch_size: 32,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoencoderEpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoencoderTrainingResult {
    pub epoch_metrics: Vec<AutoencoderEpochMetrics>,
    pub total_elapsed_ms: u128,
}

/// Builds and fits an autoencoder on `images` (`N×H×W×C`, values in `[0, 1]`).
pub fn train_autoencoder(
    architecture: EncoderArchitecture,
    images: ArrayView4<'_, f32>,
    config: &AutoencoderTrainingConfig,
    log: Option<&EpochLog>,
) -> JudgmentResult<(Autoencoder, AutoencoderTrainingResult)> {
    let (n, height, width, depth) = images.dim();
    if (height, width, depth) != architecture.input_shape {
        let (h, w, c) = architecture.input_shape;
        return Err(JudgmentError::shape_mismatch(
            "autoencoder input",
            &[h, w, c],
            &[height, width, depth],
        ));
    }
    if config.batch_size == 0 {
        return Err(JudgmentError::invalid_config(
            "autoencoder.batch_size",
            config.batch_size,
            "batch size must be at least 1",
        ));
    }

    let start = Instant::now();
    let mut model = Autoencoder::new(architecture, config.seed);
    let mut optimizer = AdamOptimizer::new(config.learning_rate);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut indices: Vec<usize> = (0..n).collect();
    let mut epoch_metrics = Vec::with_capacity(config.epochs);

    tracing::info!(
        samples = n,
        epochs = config.epochs,
        prefix_len = model.prefix_len(),
        "training autoencoder"
    );

    for epoch in 0..config.epochs {
        let epoch_start = Instant::now();
        indices.shuffle(&mut rng);
        let mut epoch_loss = 0.0;
        let mut batches = 0usize;

        for batch in indices.chunks(config.batch_size) {
            let per_sample: Vec<(f32, ParamGrads)> = batch
                .par_iter()
                .map(|&i| {
                    let image = images.index_axis(Axis(0), i).to_owned();
                    model.sample_gradients(&image)
                })
                .collect();

            let scale = 1.0 / batch.len() as f32;
            let mut samples = per_sample.into_iter();
            let Some((first_loss, mut totals)) = samples.next() else {
                continue;
            };
            let mut batch_loss = first_loss;
            for (loss, grads) in samples {
                batch_loss += loss;
                for ((total_k, total_b), (k, b)) in totals.iter_mut().zip(grads.iter()) {
                    *total_k += k;
                    *total_b += b;
                }
            }
            for (k, b) in totals.iter_mut() {
                *k *= scale;
                *b *= scale;
            }

            model.apply_gradients(&totals, &mut optimizer);
            epoch_loss += batch_loss * scale;
            batches += 1;
        }

        let loss = if batches > 0 {
            epoch_loss / batches as f32
        } else {
            0.0
        };
        let elapsed_ms = epoch_start.elapsed().as_millis();
        tracing::info!(epoch, loss, elapsed_ms = elapsed_ms as u64, "autoencoder epoch");
        record_epoch(log, "autoencoder", epoch, loss, None, elapsed_ms);
        epoch_metrics.push(AutoencoderEpochMetrics {
            epoch,
            loss,
            elapsed_ms,
        });
    }

    Ok((
        model,
        AutoencoderTrainingResult {
            epoch_metrics,
            total_elapsed_ms: start.elapsed().as_millis(),
        },
    ))
}
