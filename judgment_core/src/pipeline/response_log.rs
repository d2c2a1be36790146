//! Tab-separated response log, one row per test stimulus.
//!
//! Test stimuli come in pairs, so sample `i` is stimulus `i % 2 + 1` of trial
//! `i / 2`. Each row is written in one call and flushed, so an aborted run
//! leaves a log that ends at its last complete row.
//!
//! After the judgment columns, one `Floored<TAG>` column per head holds `1`
//! when that judgment is the decode-policy floor for an empty output row and
//! `0` otherwise.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::checkpoint::ensure_parent;
use crate::error::{JudgmentError, JudgmentResult};
use crate::reference::{DecodedJudgment, JudgmentTag};

/// Stimuli per trial in the paired-comparison test sets.
pub const STIMULI_PER_TRIAL: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRecord {
    pub trial: usize,
    pub stimulus: usize,
    /// One decoded judgment per head, in column order
    pub judgments: Vec<DecodedJudgment>,
}

impl ResponseRecord {
    pub fn from_sample(index: usize, judgments: Vec<DecodedJudgment>) -> Self {
        Self {
            trial: index / STIMULI_PER_TRIAL,
            stimulus: index % STIMULI_PER_TRIAL + 1,
            judgments,
        }
    }

    fn to_line(&self) -> String {
        let mut line = format!("{}\t{}", self.trial, self.stimulus);
        for judgment in &self.judgments {
            line.push('\t');
            line.push_str(&judgment.value.to_string());
        }
        for judgment in &self.judgments {
            line.push('\t');
            line.push(if judgment.is_floored() { '1' } else { '0' });
        }
        line.push('\n');
        line
    }
}

#[derive(Debug)]
pub struct ResponseLog {
    file: File,
    path: PathBuf,
    columns: usize,
    rows: usize,
}

impl ResponseLog {
    /// Truncates `path` and writes the header for `tags`.
    pub fn create<P: AsRef<Path>>(path: P, tags: &[JudgmentTag]) -> JudgmentResult<Self> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let mut file = File::create(path)?;

        let mut header = String::from("Trial\tStimulus");
        for tag in tags {
            header.push('\t');
            header.push_str(&tag.column_header());
        }
        for tag in tags {
            header.push('\t');
            header.push_str(&tag.floored_header());
        }
        header.push('\n');
        file.write_all(header.as_bytes())?;
        file.flush()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            columns: tags.len(),
            rows: 0,
        })
    }

    /// Writes one complete row and flushes it.
    pub fn append(&mut self, record: &ResponseRecord) -> JudgmentResult<()> {
        if record.judgments.len() != self.columns {
            return Err(JudgmentError::dimension_mismatch(
                self.columns,
                record.judgments.len(),
                "judgments per response row",
            ));
        }
        self.file.write_all(record.to_line().as_bytes())?;
        self.file.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Number of heads per row.
    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
