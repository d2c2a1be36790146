//! # Judgment Core
//!
//! Reference-threshold area judgments on top of a frozen convolutional
//! autoencoder embedding. A ladder of reference areas turns each stimulus'
//! measured area into a staircase of "exceeds this reference" bits; a small
//! head on a transplanted, frozen encoder learns to reproduce that staircase;
//! and the same ladder decodes the head's output back into a judged area.
//!
//! ## Quick Start
//!
//! ```rust
//! use judgment_core::{decode_response, encode_labels, DecodePolicy, ThresholdLadder};
//!
//! let ladder = ThresholdLadder::build(100.0, 5).unwrap();
//! let labels = encode_labels(&[55.0], &ladder);
//! assert_eq!(labels.row(0).to_vec(), vec![1, 1, 1, 0, 0]);
//!
//! let judgment = decode_response(labels.row(0), &ladder, DecodePolicy::default(), 0).unwrap();
//! assert_eq!(judgment.value, 40.0);
//! ```
//!
//! ## Core Modules
//!
//! - [`reference`] - Threshold ladders, label encoding and response decoding
//! - [`neural`] - Shared encoder architecture and the reconstruction autoencoder
//! - [`learner`] - Threshold classifiers, encoder transplant and head training
//! - [`pipeline`] - Train/evaluate orchestration, reference keys and response logs
//! - [`config`] - Run configuration via TOML
//! - [`logging`] - JSON line-delimited epoch logs

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod learner;
pub mod logging;
pub mod neural;
pub mod pipeline;
pub mod reference;

pub use checkpoint::{CheckpointError, Checkpointable};
pub use config::{
    ConfigError, EvaluatePlan, HeadSelection, LadderRange, LoadPlan, PipelineConfig, RunMode,
    TrainPlan,
};
pub use data::{pixel_area, StimulusDataset};
pub use error::{JudgmentError, JudgmentResult};
pub use learner::{
    integerize, train_head, transplant, HeadTrainingConfig, HeadTrainingReport, ThresholdClassifier,
    ThresholdHead,
};
pub use logging::EpochLog;
pub use neural::{
    train_autoencoder, AdamOptimizer, Autoencoder, AutoencoderTrainingConfig, EncoderArchitecture,
    LayerRole, WeightList,
};
pub use pipeline::{
    evaluate, run, EvaluationSummary, ReferenceKey, ResponseLog, ResponseRecord, RunError,
    RunStage, TrainedHeads,
};
pub use reference::{
    decode_response, decode_rows, encode_labels, DecodePolicy, DecodedJudgment, JudgmentTag,
    LabelMatrix, ThresholdLadder,
};
