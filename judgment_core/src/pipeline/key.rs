//! Reference key: the ladders needed to read each head's output.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::checkpoint::{ensure_parent, staging_path};
use crate::error::{JudgmentError, JudgmentResult};
use crate::reference::{JudgmentTag, ThresholdLadder};

/// Mapping from head tag (`"MA"`, `"AA"`, `"default"`) to its ladder,
/// persisted as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceKey {
    ladders: BTreeMap<String, ThresholdLadder>,
}

impl ReferenceKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: JudgmentTag, ladder: ThresholdLadder) {
        self.ladders.insert(tag.as_str().to_string(), ladder);
    }

    pub fn ladder_for(&self, tag: JudgmentTag) -> JudgmentResult<&ThresholdLadder> {
        self.ladders
            .get(tag.as_str())
            .ok_or_else(|| JudgmentError::MissingReference {
                tag: tag.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.ladders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ladders.is_empty()
    }

    /// Writes the key to a staging sibling, then renames it into place.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> JudgmentResult<()> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let staging = staging_path(path);

        let written = (|| -> JudgmentResult<()> {
            let mut writer = BufWriter::new(File::create(&staging)?);
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            Ok(())
        })();
        if let Err(err) = written {
            fs::remove_file(&staging).ok();
            return Err(err);
        }

        fs::rename(&staging, path)?;
        tracing::info!(path = %path.display(), heads = self.len(), "saved reference key");
        Ok(())
    }

    /// Reads a key and re-checks every ladder's ordering.
    pub fn load<P: AsRef<Path>>(path: P) -> JudgmentResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let raw: BTreeMap<String, Vec<f32>> = serde_json::from_reader(reader)?;

        let ladders = raw
            .into_iter()
            .map(|(tag, values)| Ok((tag, ThresholdLadder::from_values(values)?)))
            .collect::<JudgmentResult<BTreeMap<_, _>>>()?;
        Ok(Self { ladders })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrips_through_json() {
        let mut key = ReferenceKey::new();
        key.insert(JudgmentTag::MeanArea, ThresholdLadder::build(100.0, 5).unwrap());
        key.insert(JudgmentTag::AggregateArea, ThresholdLadder::build(10.0, 2).unwrap());

        let path = std::env::temp_dir().join(format!("key_{}.json", uuid::Uuid::new_v4()));
        key.save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let restored = ReferenceKey::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert!(text.contains("\"MA\""));
        assert_eq!(restored, key);
        assert_eq!(restored.ladder_for(JudgmentTag::MeanArea).unwrap()[2], 40.0);
    }

    #[test]
    fn missing_tag_is_reported() {
        let key = ReferenceKey::new();
        assert!(matches!(
            key.ladder_for(JudgmentTag::Default),
            Err(JudgmentError::MissingReference { .. })
        ));
    }

    #[test]
    fn unsorted_ladder_is_rejected_on_load() {
        let path = std::env::temp_dir().join(format!("key_{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, r#"{"default": [0.0, 5.0, 2.0]}"#).unwrap();
        let result = ReferenceKey::load(&path);
        fs::remove_file(&path).ok();
        assert!(matches!(result, Err(JudgmentError::InvalidConfiguration { .. })));
    }
}
