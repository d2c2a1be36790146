use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

fn append_json_line<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut line = serde_json::to_vec(value).map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    line.push(b'\n');
    file.write_all(&line)
}

fn timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// One training epoch as written to a `*.jsonl` run log.
#[derive(Debug, Serialize)]
pub struct EpochLogEntry<'a> {
    pub model: &'a str,
    pub epoch: usize,
    pub loss: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_match: Option<f32>,
    pub elapsed_ms: u128,
    pub timestamp_ms: u128,
}

/// Appends per-epoch metrics for one model to `<dir>/<model>.jsonl`.
#[derive(Debug, Clone)]
pub struct EpochLog {
    dir: PathBuf,
}

impl EpochLog {
    pub fn new<P: Into<PathBuf>>(dir: P) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, model: &str) -> PathBuf {
        self.dir.join(format!("{model}.jsonl"))
    }

    pub fn record(
        &self,
        model: &str,
        epoch: usize,
        loss: f32,
        exact_match: Option<f32>,
        elapsed_ms: u128,
    ) -> io::Result<()> {
        let entry = EpochLogEntry {
            model,
            epoch,
            loss,
            exact_match,
            elapsed_ms,
            timestamp_ms: timestamp_ms(),
        };
        append_json_line(self.path_for(model), &entry)
    }
}

/// Writes to an optional epoch log, downgrading failures to a warning.
pub(crate) fn record_epoch(
    log: Option<&EpochLog>,
    model: &str,
    epoch: usize,
    loss: f32,
    exact_match: Option<f32>,
    elapsed_ms: u128,
) {
    if let Some(log) = log {
        if let Err(err) = log.record(model, epoch, loss, exact_match, elapsed_ms) {
            tracing::warn!(model, epoch, "failed to append epoch log: {err}");
        }
    }
}
