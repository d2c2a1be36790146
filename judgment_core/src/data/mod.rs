//! Stimulus datasets consumed by training and evaluation.

pub mod stimulus_dataset;

pub use stimulus_dataset::{pixel_area, StimulusDataset};
