//! Head training on top of a frozen encoder.
//!
//! Embeddings are computed once, since the encoder cannot change during
//! training. Only the head's dense tensor is registered with the optimizer.

use std::time::Instant;

use ndarray::{ArrayView2, ArrayView4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::classifier::ThresholdClassifier;
use super::head::integerize_rows;
use crate::error::{JudgmentError, JudgmentResult};
use crate::logging::{record_epoch, EpochLog};
use crate::neural::{AdamOptimizer, WeightList};
use crate::reference::labels::split_point;
use crate::reference::{JudgmentTag, LabelMatrix};

/// Optimizer parameter name of the head projection.
pub const HEAD_PARAMETER: &str = "head.dense";

/// Head training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadTrainingConfig {
    /// Number of training epochs
    pub epochs: usize,
    /// Batch size for training
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f32,
    /// Seed for minibatch shuffling
    pub seed: u64,
}

impl Default for HeadTrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

/// Training metrics for a single epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadEpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub exact_match: f32,
    pub elapsed_ms: u128,
}

/// Complete head training result
#[derive(Debug, Clone, Serialize)]
pub struct HeadTrainingReport {
    pub tag: JudgmentTag,
    pub config: HeadTrainingConfig,
    pub epoch_metrics: Vec<HeadEpochMetrics>,
    pub final_exact_match: f32,
    pub total_elapsed_ms: u128,
}

/// Fraction of rows whose greatest active index equals the label's split point.
pub fn exact_match(predicted: ArrayView2<'_, u8>, labels: &LabelMatrix) -> f32 {
    if predicted.nrows() == 0 {
        return 0.0;
    }
    let hits = predicted
        .axis_iter(Axis(0))
        .zip(labels.split_points())
        .filter(|(row, expected)| split_point(row.view()) == *expected)
        .count();
    hits as f32 / predicted.nrows() as f32
}

fn check_trainable(
    classifier: &ThresholdClassifier,
    images: ArrayView4<'_, f32>,
    labels: &LabelMatrix,
    config: &HeadTrainingConfig,
) -> JudgmentResult<()> {
    let prefix_len = classifier.architecture().prefix_len();
    if classifier.frozen_prefix() != prefix_len {
        return Err(JudgmentError::architecture_mismatch(
            "frozen prefix tensors",
            prefix_len,
            classifier.frozen_prefix(),
        ));
    }
    let head_role = classifier.architecture().head_role(labels.ncols());
    let expected = prefix_len + head_role.tensor_count();
    if classifier.weight_count() != expected {
        return Err(JudgmentError::architecture_mismatch(
            "classifier weight tensors",
            expected,
            classifier.weight_count(),
        ));
    }
    if classifier.units() != labels.ncols() {
        return Err(JudgmentError::architecture_mismatch(
            "head units",
            labels.ncols(),
            classifier.units(),
        ));
    }
    let shapes = classifier.weight_shapes();
    for (found, expected) in shapes[prefix_len..].iter().zip(head_role.tensor_shapes()) {
        if *found != expected {
            return Err(JudgmentError::shape_mismatch("head weights", &expected, found));
        }
    }
    let samples = images.len_of(Axis(0));
    if samples != labels.nrows() {
        return Err(JudgmentError::dimension_mismatch(
            labels.nrows(),
            samples,
            "images per label row",
        ));
    }
    if config.batch_size == 0 {
        return Err(JudgmentError::invalid_config(
            "head.batch_size",
            config.batch_size,
            "batch size must be at least 1",
        ));
    }
    Ok(())
}

/// Trains the head of a transplanted classifier against `labels`.
///
/// # Errors
///
/// [`JudgmentError::ArchitectureMismatch`] when the encoder prefix is not
/// frozen, the weight count is off, or the head width differs from the label
/// width; [`JudgmentError::DimensionMismatch`] when image and label counts
/// differ. All checks run before any training.
pub fn train_head(
    classifier: &mut ThresholdClassifier,
    images: ArrayView4<'_, f32>,
    labels: &LabelMatrix,
    config: &HeadTrainingConfig,
    log: Option<&EpochLog>,
) -> JudgmentResult<HeadTrainingReport> {
    check_trainable(classifier, images, labels, config)?;

    let start = Instant::now();
    let tag = classifier.tag();
    let log_name = format!("head_{}", tag.as_str());
    let embeddings = classifier.embed(images)?;
    let targets = labels.to_targets();
    let mut optimizer = AdamOptimizer::new(config.learning_rate);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut indices: Vec<usize> = (0..embeddings.nrows()).collect();
    let mut epoch_metrics = Vec::with_capacity(config.epochs);

    tracing::info!(
        %tag,
        samples = indices.len(),
        units = classifier.units(),
        epochs = config.epochs,
        "training threshold head"
    );

    for epoch in 0..config.epochs {
        let epoch_start = Instant::now();
        indices.shuffle(&mut rng);
        let mut epoch_loss = 0.0;
        let mut batches = 0usize;

        for batch in indices.chunks(config.batch_size) {
            let batch_embeddings = embeddings.select(Axis(0), batch);
            let batch_targets = targets.select(Axis(0), batch);
            let head = classifier.head_mut();
            let (loss, gradient) =
                head.loss_and_gradient(batch_embeddings.view(), batch_targets.view());
            optimizer.step(HEAD_PARAMETER, &mut head.dense, &gradient);
            epoch_loss += loss;
            batches += 1;
        }

        let loss = if batches > 0 {
            epoch_loss / batches as f32
        } else {
            0.0
        };
        let predicted = integerize_rows(classifier.head().activations(embeddings.view()).view());
        let matched = exact_match(predicted.view(), labels);
        let elapsed_ms = epoch_start.elapsed().as_millis();

        tracing::info!(%tag, epoch, loss, exact_match = matched, "head epoch");
        record_epoch(log, &log_name, epoch, loss, Some(matched), elapsed_ms);
        epoch_metrics.push(HeadEpochMetrics {
            epoch,
            loss,
            exact_match: matched,
            elapsed_ms,
        });
    }

    let final_exact_match = epoch_metrics.last().map_or(0.0, |m| m.exact_match);
    Ok(HeadTrainingReport {
        tag,
        config: config.clone(),
        epoch_metrics,
        final_exact_match,
        total_elapsed_ms: start.elapsed().as_millis(),
    })
}
