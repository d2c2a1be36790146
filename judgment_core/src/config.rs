//! Run configuration loaded from TOML.
//!
//! Every key has a default, so a file only needs the sections it changes plus
//! either a complete `[train]` or a complete `[load]` section. Parsing only
//! checks types; [`PipelineConfig::validate`] resolves the run mode and rejects
//! inconsistent combinations before any file is touched.
//!
//! ```toml
//! [pipeline]
//! heads = "both"
//! references = 20
//!
//! [train]
//! dataset = "data/training.bin"
//! model_dir = "models"
//! key = "models/key.json"
//!
//! [evaluate]
//! test_data = "data/test.bin"
//! results = "results/test_results.tsv"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use toml::value::Table;
use toml::Value;

use crate::error::{JudgmentError, JudgmentResult};
use crate::learner::HeadTrainingConfig;
use crate::neural::{AutoencoderTrainingConfig, DEFAULT_CHANNELS};
use crate::reference::{DecodePolicy, JudgmentTag};

/// Which judgment heads a run trains and evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeadSelection {
    MeanArea,
    AggregateArea,
    Both,
    /// A single head without an MA/AA tag
    Untagged,
}

impl HeadSelection {
    pub fn tags(&self) -> Vec<JudgmentTag> {
        match self {
            HeadSelection::MeanArea => vec![JudgmentTag::MeanArea],
            HeadSelection::AggregateArea => vec![JudgmentTag::AggregateArea],
            HeadSelection::Both => vec![JudgmentTag::MeanArea, JudgmentTag::AggregateArea],
            HeadSelection::Untagged => vec![JudgmentTag::Default],
        }
    }

    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.to_ascii_lowercase().as_str() {
            "ma" | "mean_area" => Ok(HeadSelection::MeanArea),
            "aa" | "aggregate_area" => Ok(HeadSelection::AggregateArea),
            "both" => Ok(HeadSelection::Both),
            "default" => Ok(HeadSelection::Untagged),
            other => Err(ConfigError::Parse(format!(
                "pipeline.heads must be MA, AA, both or default, got {other:?}"
            ))),
        }
    }
}

/// Where the top of a ladder comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LadderRange {
    /// Image height × width
    ImageArea,
    /// Largest measurement in the training set
    MaxObserved,
}

impl LadderRange {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.to_ascii_lowercase().as_str() {
            "image_area" => Ok(LadderRange::ImageArea),
            "max_observed" => Ok(LadderRange::MaxObserved),
            other => Err(ConfigError::Parse(format!(
                "pipeline.ladder_range must be image_area or max_observed, got {other:?}"
            ))),
        }
    }
}

fn parse_policy(raw: &str) -> Result<DecodePolicy, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "lowest_reference" => Ok(DecodePolicy::LowestReference),
        "reject" => Ok(DecodePolicy::Reject),
        other => Err(ConfigError::Parse(format!(
            "pipeline.decode_policy must be lowest_reference or reject, got {other:?}"
        ))),
    }
}

/// `[autoencoder]`: reconstruction training plus optional pretrained/saved paths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoencoderSection {
    pub training: AutoencoderTrainingConfig,
    /// Load this checkpoint instead of training
    pub pretrained: Option<PathBuf>,
    /// Save the freshly trained autoencoder here
    pub save_to: Option<PathBuf>,
}

/// Raw `[train]` section; all three paths are required together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrainSection {
    pub dataset: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// Raw `[load]` section; both paths are required together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSection {
    pub model_dir: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// Raw `[evaluate]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvaluateSection {
    pub test_data: Option<PathBuf>,
    pub results: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainPlan {
    pub dataset: PathBuf,
    pub model_dir: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadPlan {
    pub model_dir: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluatePlan {
    pub test_data: PathBuf,
    pub results: PathBuf,
}

/// Fresh training or reuse of a persisted model + key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunMode {
    Train(TrainPlan),
    Load(LoadPlan),
}

/// Full pipeline configuration.
///
/// # Examples
///
/// ```
/// use judgment_core::config::{HeadSelection, PipelineConfig};
///
/// let config = PipelineConfig::from_str("[pipeline]\nheads = \"AA\"").unwrap();
/// assert_eq!(config.heads, HeadSelection::AggregateArea);
/// assert_eq!(config.references, 20);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub heads: HeadSelection,
    /// Number of reference thresholds per ladder, kept signed until validated
    pub references: i64,
    pub ladder_range: LadderRange,
    pub decode_policy: DecodePolicy,
    /// Directory for JSON-lines epoch logs
    pub log_dir: Option<PathBuf>,
    /// Encoder channel widths
    pub channels: Vec<usize>,
    pub autoencoder: AutoencoderSection,
    pub head: HeadTrainingConfig,
    pub train: TrainSection,
    pub load: LoadSection,
    /// `None` when the file has no `[evaluate]` section
    pub evaluate: Option<EvaluateSection>,
}

impl PipelineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let value: Value =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let defaults = Self::default();

        let pipeline = section(&value, "pipeline");
        let heads = match string(&pipeline, "pipeline", "heads")? {
            Some(raw) => HeadSelection::parse(raw)?,
            None => defaults.heads,
        };
        let references = integer(&pipeline, "pipeline", "references")?.unwrap_or(defaults.references);
        let ladder_range = match string(&pipeline, "pipeline", "ladder_range")? {
            Some(raw) => LadderRange::parse(raw)?,
            None => defaults.ladder_range,
        };
        let decode_policy = match string(&pipeline, "pipeline", "decode_policy")? {
            Some(raw) => parse_policy(raw)?,
            None => defaults.decode_policy,
        };
        let log_dir = path(&pipeline, "pipeline", "log_dir")?;

        let architecture = section(&value, "architecture");
        let channels = match architecture.get("channels") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_integer()
                        .filter(|&c| c > 0)
                        .map(|c| c as usize)
                        .ok_or_else(|| {
                            ConfigError::Parse(
                                "architecture.channels must be positive integers".into(),
                            )
                        })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(ConfigError::Parse(
                    "architecture.channels must be an array".into(),
                ))
            }
            None => defaults.channels,
        };

        let ae = section(&value, "autoencoder");
        let ae_defaults = defaults.autoencoder.training;
        let autoencoder = AutoencoderSection {
            training: AutoencoderTrainingConfig {
                epochs: count(&ae, "autoencoder", "epochs")?.unwrap_or(ae_defaults.epochs),
                batch_size: count(&ae, "autoencoder", "batch_size")?
                    .map(|v| v.max(1))
                    .unwrap_or(ae_defaults.batch_size),
                learning_rate: float(&ae, "autoencoder", "learning_rate")?
                    .unwrap_or(ae_defaults.learning_rate),
                seed: seed(&ae, "autoencoder")?.unwrap_or(ae_defaults.seed),
            },
            pretrained: path(&ae, "autoencoder", "pretrained")?,
            save_to: path(&ae, "autoencoder", "save_to")?,
        };

        let hd = section(&value, "head");
        let head = HeadTrainingConfig {
            epochs: count(&hd, "head", "epochs")?.unwrap_or(defaults.head.epochs),
            batch_size: count(&hd, "head", "batch_size")?
                .map(|v| v.max(1))
                .unwrap_or(defaults.head.batch_size),
            learning_rate: float(&hd, "head", "learning_rate")?
                .unwrap_or(defaults.head.learning_rate),
            seed: seed(&hd, "head")?.unwrap_or(defaults.head.seed),
        };

        let tr = section(&value, "train");
        let train = TrainSection {
            dataset: path(&tr, "train", "dataset")?,
            model_dir: path(&tr, "train", "model_dir")?,
            key: path(&tr, "train", "key")?,
        };

        let ld = section(&value, "load");
        let load = LoadSection {
            model_dir: path(&ld, "load", "model_dir")?,
            key: path(&ld, "load", "key")?,
        };

        let evaluate = match value.get("evaluate").and_then(|v| v.as_table()) {
            Some(table) => Some(EvaluateSection {
                test_data: path(table, "evaluate", "test_data")?,
                results: path(table, "evaluate", "results")?,
            }),
            None => None,
        };

        Ok(Self {
            heads,
            references,
            ladder_range,
            decode_policy,
            log_dir,
            channels,
            autoencoder,
            head,
            train,
            load,
            evaluate,
        })
    }

    /// Reference count as validated by [`validate`](Self::validate).
    pub fn reference_count(&self) -> JudgmentResult<usize> {
        if self.references < 1 {
            return Err(JudgmentError::invalid_config(
                "pipeline.references",
                self.references,
                "at least one reference threshold is required",
            ));
        }
        Ok(self.references as usize)
    }

    /// Resolves the run mode, rejecting incomplete or conflicting sections.
    pub fn validate(&self) -> JudgmentResult<RunMode> {
        self.reference_count()?;
        if self.channels.is_empty() {
            return Err(JudgmentError::invalid_config(
                "architecture.channels",
                "[]",
                "the encoder needs at least one stage",
            ));
        }

        let train = match (&self.train.dataset, &self.train.model_dir, &self.train.key) {
            (Some(dataset), Some(model_dir), Some(key)) => Some(TrainPlan {
                dataset: dataset.clone(),
                model_dir: model_dir.clone(),
                key: key.clone(),
            }),
            _ => None,
        };
        let load = match (&self.load.model_dir, &self.load.key) {
            (Some(model_dir), Some(key)) => Some(LoadPlan {
                model_dir: model_dir.clone(),
                key: key.clone(),
            }),
            _ => None,
        };

        let mode = match (train, load) {
            (Some(train), None) => RunMode::Train(train),
            (None, Some(load)) => RunMode::Load(load),
            (Some(_), Some(_)) => {
                return Err(JudgmentError::invalid_config(
                    "train/load",
                    "both",
                    "supply either a complete [train] or a complete [load] section, not both",
                ))
            }
            (None, None) => {
                return Err(JudgmentError::invalid_config(
                    "train/load",
                    "neither",
                    "supply [train] dataset, model_dir and key, or [load] model_dir and key",
                ))
            }
        };

        let evaluate = self.evaluate_plan()?;
        if matches!(mode, RunMode::Load(_)) && evaluate.is_none() {
            return Err(JudgmentError::invalid_config(
                "evaluate",
                "missing",
                "load mode needs an [evaluate] section",
            ));
        }
        Ok(mode)
    }

    /// The `[evaluate]` paths, if the section is present.
    pub fn evaluate_plan(&self) -> JudgmentResult<Option<EvaluatePlan>> {
        match &self.evaluate {
            None => Ok(None),
            Some(EvaluateSection {
                test_data: Some(test_data),
                results: Some(results),
            }) => Ok(Some(EvaluatePlan {
                test_data: test_data.clone(),
                results: results.clone(),
            })),
            Some(_) => Err(JudgmentError::invalid_config(
                "evaluate",
                "incomplete",
                "[evaluate] needs both test_data and results",
            )),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            heads: HeadSelection::MeanArea,
            references: 20,
            ladder_range: LadderRange::ImageArea,
            decode_policy: DecodePolicy::default(),
            log_dir: None,
            channels: DEFAULT_CHANNELS.to_vec(),
            autoencoder: AutoencoderSection {
                training: AutoencoderTrainingConfig::default(),
                pretrained: None,
                save_to: None,
            },
            head: HeadTrainingConfig::default(),
            train: TrainSection::default(),
            load: LoadSection::default(),
            evaluate: None,
        }
    }
}

fn section(value: &Value, name: &str) -> Table {
    value
        .get(name)
        .and_then(|v| v.as_table())
        .cloned()
        .unwrap_or_default()
}

fn string<'a>(table: &'a Table, section: &str, key: &str) -> Result<Option<&'a str>, ConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| ConfigError::Parse(format!("{section}.{key} must be a string"))),
    }
}

fn path(table: &Table, section: &str, key: &str) -> Result<Option<PathBuf>, ConfigError> {
    Ok(string(table, section, key)?
        .filter(|s| !s.is_empty())
        .map(PathBuf::from))
}

fn integer(table: &Table, section: &str, key: &str) -> Result<Option<i64>, ConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .map(Some)
            .ok_or_else(|| ConfigError::Parse(format!("{section}.{key} must be an integer"))),
    }
}

fn count(table: &Table, section: &str, key: &str) -> Result<Option<usize>, ConfigError> {
    match integer(table, section, key)? {
        Some(v) if v < 0 => Err(ConfigError::Parse(format!(
            "{section}.{key} must not be negative, got {v}"
        ))),
        other => Ok(other.map(|v| v as usize)),
    }
}

fn float(table: &Table, section: &str, key: &str) -> Result<Option<f32>, ConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_float()
            .or_else(|| value.as_integer().map(|int| int as f64))
            .map(|v| Some(v as f32))
            .ok_or_else(|| ConfigError::Parse(format!("{section}.{key} must be a number"))),
    }
}

fn seed(table: &Table, section: &str) -> Result<Option<u64>, ConfigError> {
    Ok(count(table, section, "seed")?.map(|v| v as u64))
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "IO error: {}", err),
            ConfigError::Parse(err) => write!(f, "Parse error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAIN: &str = "[train]\ndataset = \"d.bin\"\nmodel_dir = \"models\"\nkey = \"key.json\"\n";
    const LOAD: &str = "[load]\nmodel_dir = \"models\"\nkey = \"key.json\"\n";
    const EVALUATE: &str = "[evaluate]\ntest_data = \"t.bin\"\nresults = \"out.tsv\"\n";

    #[test]
    fn defaults_when_sections_missing() {
        let config = PipelineConfig::from_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.head.epochs, 50);
        assert_eq!(config.autoencoder.training.epochs, 2);
        assert_eq!(config.channels, vec![64, 32, 32, 32, 32]);
    }

    #[test]
    fn parses_custom_values() {
        let toml = "[pipeline]\nheads = \"both\"\nreferences = 8\nladder_range = \"max_observed\"\ndecode_policy = \"reject\"\nlog_dir = \"logs\"\n\
                    [architecture]\nchannels = [8, 4]\n\
                    [autoencoder]\nepochs = 3\nlearning_rate = 0.01\npretrained = \"ae.bin\"\n\
                    [head]\nepochs = 5\nbatch_size = 0\nlearning_rate = 1\n";
        let config = PipelineConfig::from_str(toml).unwrap();
        assert_eq!(config.heads.tags(), vec![JudgmentTag::MeanArea, JudgmentTag::AggregateArea]);
        assert_eq!(config.references, 8);
        assert_eq!(config.ladder_range, LadderRange::MaxObserved);
        assert_eq!(config.decode_policy, DecodePolicy::Reject);
        assert_eq!(config.log_dir, Some(PathBuf::from("logs")));
        assert_eq!(config.channels, vec![8, 4]);
        assert_eq!(config.autoencoder.training.epochs, 3);
        assert_eq!(config.autoencoder.pretrained, Some(PathBuf::from("ae.bin")));
        assert_eq!(config.head.epochs, 5);
        assert_eq!(config.head.batch_size, 1);
        assert_eq!(config.head.learning_rate, 1.0);
    }

    #[test]
    fn unknown_head_selection_is_a_parse_error() {
        let err = PipelineConfig::from_str("[pipeline]\nheads = \"XY\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn negative_counts_are_rejected() {
        for toml in [
            "[head]\nepochs = -5",
            "[autoencoder]\nepochs = -1",
            "[autoencoder]\nbatch_size = -32",
            "[head]\nseed = -7",
        ] {
            match PipelineConfig::from_str(toml) {
                Err(ConfigError::Parse(message)) => assert!(message.contains("negative"), "{message}"),
                other => panic!("{toml:?} parsed as {other:?}"),
            }
        }
    }

    #[test]
    fn wrongly_typed_values_are_rejected() {
        for toml in [
            "[pipeline]\nheads = [\"MA\", \"AA\"]",
            "[pipeline]\nreferences = \"20\"",
            "[pipeline]\ndecode_policy = 1",
            "[head]\nepochs = 2.5",
            "[head]\nlearning_rate = \"fast\"",
            "[train]\ndataset = 3",
        ] {
            assert!(
                matches!(PipelineConfig::from_str(toml), Err(ConfigError::Parse(_))),
                "{toml:?} should not parse"
            );
        }
    }

    #[test]
    fn complete_train_section_selects_train_mode() {
        let config = PipelineConfig::from_str(TRAIN).unwrap();
        match config.validate().unwrap() {
            RunMode::Train(plan) => assert_eq!(plan.model_dir, PathBuf::from("models")),
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn load_mode_requires_evaluate_section() {
        let config = PipelineConfig::from_str(LOAD).unwrap();
        assert!(config.validate().is_err());

        let config = PipelineConfig::from_str(&format!("{LOAD}{EVALUATE}")).unwrap();
        assert!(matches!(config.validate().unwrap(), RunMode::Load(_)));
    }

    #[test]
    fn neither_or_both_sections_is_invalid() {
        let partial = PipelineConfig::from_str("[train]\ndataset = \"d.bin\"").unwrap();
        assert!(matches!(
            partial.validate(),
            Err(JudgmentError::InvalidConfiguration { .. })
        ));

        let both = PipelineConfig::from_str(&format!("{TRAIN}{LOAD}{EVALUATE}")).unwrap();
        assert!(matches!(
            both.validate(),
            Err(JudgmentError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn non_positive_reference_count_is_invalid() {
        for count in [0, -3] {
            let config =
                PipelineConfig::from_str(&format!("[pipeline]\nreferences = {count}\n{TRAIN}")).unwrap();
            assert!(matches!(
                config.validate(),
                Err(JudgmentError::InvalidConfiguration { .. })
            ));
        }
    }

    #[test]
    fn incomplete_evaluate_section_is_invalid() {
        let config =
            PipelineConfig::from_str(&format!("{TRAIN}[evaluate]\ntest_data = \"t.bin\"\n")).unwrap();
        assert!(config.validate().is_err());
    }
}
