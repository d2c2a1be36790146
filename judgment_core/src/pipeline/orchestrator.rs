//! Train and evaluate entry points.
//!
//! Training: `LoadData → DeriveLadder → TrainAutoencoder | LoadAutoencoder →
//! Transplant → TrainHead → PersistModel`.
//! Evaluation: `LoadModelAndKey → LoadTestData → Predict → Decode → WriteLog`.
//!
//! Every stage is synchronous. The first failure aborts the run and is
//! reported as a [`RunError`] naming the stage it happened in.

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::Array2;

use super::key::ReferenceKey;
use super::response_log::{ResponseLog, ResponseRecord};
use crate::checkpoint::Checkpointable;
use crate::config::{EvaluatePlan, LadderRange, LoadPlan, PipelineConfig, RunMode, TrainPlan};
use crate::data::StimulusDataset;
use crate::error::JudgmentError;
use crate::learner::{train_head, transplant, HeadTrainingReport, ThresholdClassifier};
use crate::logging::EpochLog;
use crate::neural::{train_autoencoder, Autoencoder, EncoderArchitecture};
use crate::reference::{decode_response, encode_labels, DecodePolicy, JudgmentTag, ThresholdLadder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Configure,
    LoadData,
    DeriveLadder,
    TrainAutoencoder,
    LoadAutoencoder,
    Transplant,
    TrainHead,
    PersistModel,
    LoadModelAndKey,
    LoadTestData,
    Predict,
    Decode,
    WriteLog,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Configure => "configure",
            RunStage::LoadData => "load data",
            RunStage::DeriveLadder => "derive ladder",
            RunStage::TrainAutoencoder => "train autoencoder",
            RunStage::LoadAutoencoder => "load autoencoder",
            RunStage::Transplant => "transplant",
            RunStage::TrainHead => "train head",
            RunStage::PersistModel => "persist model",
            RunStage::LoadModelAndKey => "load model and key",
            RunStage::LoadTestData => "load test data",
            RunStage::Predict => "predict",
            RunStage::Decode => "decode",
            RunStage::WriteLog => "write log",
        };
        f.write_str(name)
    }
}

/// A failed run: the stage that aborted and why.
#[derive(Debug)]
pub struct RunError {
    pub stage: RunStage,
    pub source: JudgmentError,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run aborted during {}: {}", self.stage, self.source)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

pub type RunResult<T> = Result<T, RunError>;

trait AtStage<T> {
    fn at(self, stage: RunStage) -> RunResult<T>;
}

impl<T, E: Into<JudgmentError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: RunStage) -> RunResult<T> {
        self.map_err(|err| {
            let source = err.into();
            tracing::error!(%stage, error = %source, "run aborted");
            RunError { stage, source }
        })
    }
}

/// A head ready for prediction, with the ladder that decodes it.
#[derive(Debug, Clone)]
pub struct TrainedHead {
    pub classifier: ThresholdClassifier,
    pub ladder: ThresholdLadder,
    /// `None` for heads loaded from disk
    pub report: Option<HeadTrainingReport>,
}

#[derive(Debug, Clone)]
pub struct TrainedHeads {
    pub heads: Vec<TrainedHead>,
    pub key: ReferenceKey,
}

impl TrainedHeads {
    pub fn tags(&self) -> Vec<JudgmentTag> {
        self.heads.iter().map(|h| h.classifier.tag()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub results: PathBuf,
    pub rows_written: usize,
    /// Judgments that hit the all-zero floor of the decode policy
    pub floored: usize,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub heads: TrainedHeads,
    pub evaluation: Option<EvaluationSummary>,
}

/// `<model_dir>/head_<TAG>.bin`
pub fn model_path(model_dir: &Path, tag: JudgmentTag) -> PathBuf {
    model_dir.join(format!("head_{}.bin", tag.as_str()))
}

fn epoch_log(config: &PipelineConfig) -> RunResult<Option<EpochLog>> {
    config
        .log_dir
        .as_ref()
        .map(EpochLog::new)
        .transpose()
        .at(RunStage::Configure)
}

fn derive_ladder(
    config: &PipelineConfig,
    dataset: &StimulusDataset,
    measurements: &[f32],
) -> RunResult<ThresholdLadder> {
    let count = config.reference_count().at(RunStage::Configure)?;
    let ladder = match config.ladder_range {
        LadderRange::ImageArea => {
            let (height, width, _) = dataset.image_shape();
            ThresholdLadder::for_image_area(height, width, count)
        }
        LadderRange::MaxObserved => ThresholdLadder::for_max_observed(measurements, count),
    };
    ladder.at(RunStage::DeriveLadder)
}

fn obtain_autoencoder(
    config: &PipelineConfig,
    architecture: &EncoderArchitecture,
    dataset: &StimulusDataset,
    log: Option<&EpochLog>,
) -> RunResult<Autoencoder> {
    if let Some(pretrained) = &config.autoencoder.pretrained {
        let autoencoder = Autoencoder::load_checkpoint(pretrained).at(RunStage::LoadAutoencoder)?;
        tracing::info!(path = %pretrained.display(), "loaded pretrained autoencoder");
        return Ok(autoencoder);
    }

    let (autoencoder, result) = train_autoencoder(
        architecture.clone(),
        dataset.images(),
        &config.autoencoder.training,
        log,
    )
    .at(RunStage::TrainAutoencoder)?;
    tracing::info!(
        epochs = result.epoch_metrics.len(),
        elapsed_ms = result.total_elapsed_ms as u64,
        "autoencoder trained"
    );

    if let Some(save_to) = &config.autoencoder.save_to {
        autoencoder
            .save_checkpoint(save_to)
            .at(RunStage::TrainAutoencoder)?;
    }
    Ok(autoencoder)
}

/// Trains every selected head from a fresh or pretrained autoencoder, then
/// persists the models and their key.
pub fn train(config: &PipelineConfig, plan: &TrainPlan) -> RunResult<TrainedHeads> {
    let log = epoch_log(config)?;

    tracing::info!(dataset = %plan.dataset.display(), "loading training data");
    let dataset = StimulusDataset::load_checkpoint(&plan.dataset).at(RunStage::LoadData)?;
    let architecture = EncoderArchitecture::new(dataset.image_shape(), config.channels.clone())
        .at(RunStage::LoadData)?;
    let tags = config.heads.tags();
    let measurements = tags
        .iter()
        .map(|&tag| dataset.measurements_for(tag))
        .collect::<Result<Vec<_>, _>>()
        .at(RunStage::LoadData)?;

    let mut key = ReferenceKey::new();
    let mut ladders = Vec::with_capacity(tags.len());
    for (&tag, values) in tags.iter().zip(&measurements) {
        let ladder = derive_ladder(config, &dataset, values)?;
        tracing::info!(%tag, references = ladder.len(), top = ladder.values()[ladder.len() - 1], "derived ladder");
        key.insert(tag, ladder.clone());
        ladders.push(ladder);
    }

    let autoencoder = obtain_autoencoder(config, &architecture, &dataset, log.as_ref())?;

    let mut heads = Vec::with_capacity(tags.len());
    for ((&tag, values), ladder) in tags.iter().zip(&measurements).zip(ladders) {
        let mut classifier =
            ThresholdClassifier::skeleton(architecture.clone(), tag, ladder.len(), config.head.seed)
                .at(RunStage::Transplant)?;
        transplant(&autoencoder, &mut classifier, architecture.prefix_len())
            .at(RunStage::Transplant)?;

        let labels = encode_labels(values, &ladder);
        let report = train_head(
            &mut classifier,
            dataset.images(),
            &labels,
            &config.head,
            log.as_ref(),
        )
        .at(RunStage::TrainHead)?;
        tracing::info!(%tag, exact_match = report.final_exact_match, "head trained");

        heads.push(TrainedHead {
            classifier,
            ladder,
            report: Some(report),
        });
    }

    for head in &heads {
        let path = model_path(&plan.model_dir, head.classifier.tag());
        head.classifier
            .save_checkpoint(&path)
            .at(RunStage::PersistModel)?;
        tracing::info!(path = %path.display(), "saved model");
    }
    key.save(&plan.key).at(RunStage::PersistModel)?;

    Ok(TrainedHeads { heads, key })
}

/// Loads a persisted model and ladder for every selected head.
pub fn load(config: &PipelineConfig, plan: &LoadPlan) -> RunResult<TrainedHeads> {
    let key = ReferenceKey::load(&plan.key).at(RunStage::LoadModelAndKey)?;

    let mut heads = Vec::new();
    for tag in config.heads.tags() {
        let ladder = key.ladder_for(tag).at(RunStage::LoadModelAndKey)?.clone();
        let path = model_path(&plan.model_dir, tag);
        let classifier =
            ThresholdClassifier::load_checkpoint(&path).at(RunStage::LoadModelAndKey)?;

        if classifier.units() != ladder.len() {
            return Err(JudgmentError::architecture_mismatch(
                format!("{tag} head units against key ladder"),
                ladder.len(),
                classifier.units(),
            ))
            .at(RunStage::LoadModelAndKey);
        }
        tracing::info!(%tag, path = %path.display(), "loaded model");
        heads.push(TrainedHead {
            classifier,
            ladder,
            report: None,
        });
    }

    Ok(TrainedHeads { heads, key })
}

/// Runs every head over the test stimuli and writes the response log.
pub fn evaluate(
    config: &PipelineConfig,
    heads: &TrainedHeads,
    plan: &EvaluatePlan,
) -> RunResult<EvaluationSummary> {
    let dataset = StimulusDataset::load_checkpoint(&plan.test_data).at(RunStage::LoadTestData)?;
    tracing::info!(samples = dataset.len(), "loaded test data");

    let predictions: Vec<Array2<u8>> = heads
        .heads
        .iter()
        .map(|head| head.classifier.predict(dataset.images()))
        .collect::<Result<_, _>>()
        .at(RunStage::Predict)?;

    let ladders: Vec<ThresholdLadder> = heads.heads.iter().map(|h| h.ladder.clone()).collect();
    let mut log = ResponseLog::create(&plan.results, &heads.tags()).at(RunStage::WriteLog)?;
    let floored = write_responses(&ladders, &predictions, config.decode_policy, &mut log)?;

    tracing::info!(
        results = %plan.results.display(),
        rows = log.rows_written(),
        floored,
        "wrote response log"
    );
    Ok(EvaluationSummary {
        results: log.path().to_path_buf(),
        rows_written: log.rows_written(),
        floored,
    })
}

/// Decodes each head's predictions sample by sample and appends one row per
/// sample to `log`. Returns how many judgments were floored.
///
/// `ladders[h]` decodes `predictions[h]`. A decode failure aborts before its
/// row is written, leaving the rows of every earlier sample in place.
pub fn write_responses(
    ladders: &[ThresholdLadder],
    predictions: &[Array2<u8>],
    policy: DecodePolicy,
    log: &mut ResponseLog,
) -> RunResult<usize> {
    if ladders.len() != predictions.len() || log.columns() != predictions.len() {
        return Err(JudgmentError::dimension_mismatch(
            log.columns(),
            predictions.len(),
            "prediction matrices per response column",
        ))
        .at(RunStage::Decode);
    }
    let samples = predictions.first().map_or(0, |p| p.nrows());
    if let Some(ragged) = predictions.iter().find(|p| p.nrows() != samples) {
        return Err(JudgmentError::dimension_mismatch(
            samples,
            ragged.nrows(),
            "predicted rows per head",
        ))
        .at(RunStage::Decode);
    }

    let mut floored = 0usize;
    for sample in 0..samples {
        let mut judgments = Vec::with_capacity(predictions.len());
        for (ladder, predicted) in ladders.iter().zip(predictions) {
            let decoded =
                decode_response(predicted.row(sample), ladder, policy, sample).at(RunStage::Decode)?;
            if decoded.is_floored() {
                floored += 1;
            }
            judgments.push(decoded);
        }
        log.append(&ResponseRecord::from_sample(sample, judgments))
            .at(RunStage::WriteLog)?;
    }
    Ok(floored)
}

/// Validates `config`, trains or loads, then evaluates if requested.
pub fn run(config: &PipelineConfig) -> RunResult<RunOutcome> {
    let mode = config.validate().at(RunStage::Configure)?;
    let evaluate_plan = config.evaluate_plan().at(RunStage::Configure)?;

    let heads = match &mode {
        RunMode::Train(plan) => train(config, plan)?,
        RunMode::Load(plan) => load(config, plan)?,
    };
    let evaluation = evaluate_plan
        .map(|plan| evaluate(config, &heads, &plan))
        .transpose()?;

    Ok(RunOutcome { heads, evaluation })
}
