//! Versioned binary persistence for models and stimulus datasets.
//!
//! Implementations store a version header alongside the serialized payload so
//! incompatible files are rejected during load. Snapshots are written to a
//! temporary sibling and renamed into place, so a failed save never leaves a
//! truncated file at the destination path.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bincode::Options;

/// Errors that can occur while saving or loading checkpoints.
#[derive(Debug)]
pub enum CheckpointError {
    /// Underlying I/O failure while reading or writing checkpoint files.
    Io(std::io::Error),
    /// Serialization or deserialization error from the binary codec.
    Serialization(bincode::Error),
    /// The file was well formed but carries an incompatible schema version.
    VersionMismatch { expected: u32, found: u32 },
    /// The file did not match the expected structure.
    InvalidFormat(String),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Io(err) => write!(f, "I/O error while accessing checkpoint: {err}"),
            CheckpointError::Serialization(err) => {
                write!(f, "Failed to (de)serialize checkpoint payload: {err}")
            }
            CheckpointError::VersionMismatch { expected, found } => write!(
                f,
                "Checkpoint version mismatch: expected {expected}, found {found}",
            ),
            CheckpointError::InvalidFormat(msg) => {
                write!(f, "Checkpoint file has invalid structure: {msg}")
            }
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        CheckpointError::Io(err)
    }
}

impl From<bincode::Error> for CheckpointError {
    fn from(err: bincode::Error) -> Self {
        CheckpointError::Serialization(err)
    }
}

/// Deterministic binary codec options shared by all checkpoint implementations.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_little_endian()
}

/// Sibling path used while a snapshot is being written.
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Creates the parent directory of `path` if it has one.
pub(crate) fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Components that support deterministic persistence implement this trait.
pub trait Checkpointable: Sized {
    /// Save the current state to `path` using the deterministic codec.
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError>;

    /// Load a state from `path`, replacing any existing instance.
    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError>;

    /// Utility for writing a serializable snapshot with the shared codec.
    fn write_snapshot<P, T>(snapshot: &T, path: P) -> Result<(), CheckpointError>
    where
        P: AsRef<Path>,
        T: serde::Serialize,
    {
        let path = path.as_ref();
        ensure_parent(path)?;

        let staging = staging_path(path);
        let result = (|| -> Result<(), CheckpointError> {
            let file = File::create(&staging)?;
            let mut writer = BufWriter::new(file);
            codec().serialize_into(&mut writer, snapshot)?;
            writer.flush()?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                fs::rename(&staging, path)?;
                Ok(())
            }
            Err(err) => {
                fs::remove_file(&staging).ok();
                Err(err)
            }
        }
    }

    /// Utility for reading a serializable snapshot with the shared codec.
    fn read_snapshot<P, T>(path: P) -> Result<T, CheckpointError>
    where
        P: AsRef<Path>,
        T: serde::de::DeserializeOwned,
    {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Ok(codec().deserialize_from(&mut reader)?)
    }
}

/// Rejects snapshots written under a different schema version.
pub(crate) fn check_version(expected: u32, found: u32) -> Result<(), CheckpointError> {
    if expected != found {
        return Err(CheckpointError::VersionMismatch { expected, found });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_path_is_a_sibling() {
        let staged = staging_path(Path::new("models/head_MA.bin"));
        assert_eq!(staged, Path::new("models/head_MA.bin.partial"));
    }

    #[test]
    fn version_check_rejects_other_versions() {
        assert!(check_version(1, 1).is_ok());
        assert!(matches!(
            check_version(1, 2),
            Err(CheckpointError::VersionMismatch {
                expected: 1,
                found: 2
            })
        ));
    }
}
