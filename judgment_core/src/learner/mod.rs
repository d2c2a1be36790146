//! Threshold classifiers built on a transplanted, frozen encoder.
//!
//! A run builds a [`ThresholdClassifier`] skeleton from the shared
//! architecture, [`transplant`]s the trained autoencoder's encoder prefix into
//! it, then trains only the head with [`train_head`].

pub mod classifier;
pub mod head;
pub mod training;
pub mod transplant;

pub use classifier::ThresholdClassifier;
pub use head::{integerize, integerize_rows, ThresholdHead};
pub use training::{
    exact_match, train_head, HeadEpochMetrics, HeadTrainingConfig, HeadTrainingReport,
};
pub use transplant::transplant;
