//! Judgment head identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which area measurement a head is trained to judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JudgmentTag {
    /// Mean area of the items in a stimulus
    MeanArea,
    /// Aggregate area covered by all items in a stimulus
    AggregateArea,
    /// Untagged single-head runs
    Default,
}

impl JudgmentTag {
    /// Key used in the reference key file and in model file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            JudgmentTag::MeanArea => "MA",
            JudgmentTag::AggregateArea => "AA",
            JudgmentTag::Default => "default",
        }
    }

    /// Column header for this head in the response log.
    pub fn column_header(&self) -> String {
        match self {
            JudgmentTag::Default => "ModelResponse".to_string(),
            tag => format!("ModelResponse{}", tag.as_str()),
        }
    }

    /// Column marking judgments that fell back to the decode policy floor.
    pub fn floored_header(&self) -> String {
        match self {
            JudgmentTag::Default => "Floored".to_string(),
            tag => format!("Floored{}", tag.as_str()),
        }
    }
}

impl fmt::Display for JudgmentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JudgmentTag {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ma" | "mean_area" => Ok(JudgmentTag::MeanArea),
            "aa" | "aggregate_area" => Ok(JudgmentTag::AggregateArea),
            "default" | "" => Ok(JudgmentTag::Default),
            other => Err(format!("unknown judgment tag '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_key_strings() {
        for tag in [
            JudgmentTag::MeanArea,
            JudgmentTag::AggregateArea,
            JudgmentTag::Default,
        ] {
            assert_eq!(tag.as_str().parse::<JudgmentTag>(), Ok(tag));
        }
    }

    #[test]
    fn column_headers() {
        assert_eq!(JudgmentTag::MeanArea.column_header(), "ModelResponseMA");
        assert_eq!(JudgmentTag::AggregateArea.column_header(), "ModelResponseAA");
        assert_eq!(JudgmentTag::Default.column_header(), "ModelResponse");
        assert_eq!(JudgmentTag::AggregateArea.floored_header(), "FlooredAA");
        assert_eq!(JudgmentTag::Default.floored_header(), "Floored");
    }
}
