//! Error types for the judgment pipeline.
//!
//! Every failure the core can raise is a variant of [`JudgmentError`]. None of
//! them are retried: they surface to the orchestrator, which aborts the run.

use std::fmt;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;

/// Result type alias for judgment pipeline operations
pub type JudgmentResult<T> = Result<T, JudgmentError>;

/// Error taxonomy for ladder construction, transplant, head training and decoding
#[derive(Debug)]
pub enum JudgmentError {
    /// A configuration value is out of range or a required combination is missing
    InvalidConfiguration {
        parameter: String,
        value: String,
        reason: String,
    },

    /// Weight tensor shapes (or the prefix length) differ between two models
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// Frozen/head weight counts do not match what the architecture declares
    ArchitectureMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    /// A head output row has no active unit and the decode policy rejects it
    DecodeAmbiguity { row: usize },

    /// Two collections that must pair up element-wise have different lengths
    DimensionMismatch {
        expected: usize,
        got: usize,
        context: String,
    },

    /// The dataset carries no measurements for the requested judgment head
    MissingMeasurement { tag: String },

    /// The reference key has no ladder for the requested judgment head
    MissingReference { tag: String },

    /// Filesystem failure while reading inputs or writing outputs
    Io(std::io::Error),

    /// Model or dataset checkpoint could not be read or written
    Checkpoint(CheckpointError),

    /// Configuration file could not be read or parsed
    Config(ConfigError),

    /// Reference key (JSON) could not be encoded or decoded
    Serialization(serde_json::Error),
}

impl fmt::Display for JudgmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JudgmentError::InvalidConfiguration {
                parameter,
                value,
                reason,
            } => write!(
                f,
                "Invalid configuration for parameter '{}' with value '{}': {}",
                parameter, value, reason
            ),
            JudgmentError::ShapeMismatch {
                context,
                expected,
                found,
            } => write!(
                f,
                "Shape mismatch in {}: expected {:?}, found {:?}",
                context, expected, found
            ),
            JudgmentError::ArchitectureMismatch {
                context,
                expected,
                found,
            } => write!(
                f,
                "Architecture mismatch in {}: expected {}, found {}",
                context, expected, found
            ),
            JudgmentError::DecodeAmbiguity { row } => write!(
                f,
                "Response row {} has no active unit and the decode policy rejects empty rows",
                row
            ),
            JudgmentError::DimensionMismatch {
                expected,
                got,
                context,
            } => write!(
                f,
                "Dimension mismatch in {}: expected {}, got {}",
                context, expected, got
            ),
            JudgmentError::MissingMeasurement { tag } => {
                write!(f, "Dataset has no '{}' measurements", tag)
            }
            JudgmentError::MissingReference { tag } => {
                write!(f, "Reference key has no ladder for head '{}'", tag)
            }
            JudgmentError::Io(err) => write!(f, "I/O error: {}", err),
            JudgmentError::Checkpoint(err) => write!(f, "{}", err),
            JudgmentError::Config(err) => write!(f, "{}", err),
            JudgmentError::Serialization(err) => write!(f, "Reference key error: {}", err),
        }
    }
}

impl std::error::Error for JudgmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JudgmentError::Io(err) => Some(err),
            JudgmentError::Checkpoint(err) => Some(err),
            JudgmentError::Config(err) => Some(err),
            JudgmentError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for JudgmentError {
    fn from(err: std::io::Error) -> Self {
        JudgmentError::Io(err)
    }
}

impl From<CheckpointError> for JudgmentError {
    fn from(err: CheckpointError) -> Self {
        JudgmentError::Checkpoint(err)
    }
}

impl From<ConfigError> for JudgmentError {
    fn from(err: ConfigError) -> Self {
        JudgmentError::Config(err)
    }
}

impl From<serde_json::Error> for JudgmentError {
    fn from(err: serde_json::Error) -> Self {
        JudgmentError::Serialization(err)
    }
}

// Convenience constructors for common error patterns
impl JudgmentError {
    pub fn invalid_config(
        parameter: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        JudgmentError::InvalidConfiguration {
            parameter: parameter.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn shape_mismatch(context: impl Into<String>, expected: &[usize], found: &[usize]) -> Self {
        JudgmentError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    pub fn architecture_mismatch(context: impl Into<String>, expected: usize, found: usize) -> Self {
        JudgmentError::ArchitectureMismatch {
            context: context.into(),
            expected,
            found,
        }
    }

    pub fn dimension_mismatch(expected: usize, got: usize, context: impl Into<String>) -> Self {
        JudgmentError::DimensionMismatch {
            expected,
            got,
            context: context.into(),
        }
    }
}
