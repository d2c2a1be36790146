//! Reference-threshold protocol: ladder construction, label encoding and
//! response decoding.
//!
//! The same [`ThresholdLadder`] is used to build supervised targets for a
//! head and, persisted as the head's key, to translate its binary output
//! back into a scalar judgment.

pub mod decoder;
pub mod ladder;
pub mod labels;
pub mod tag;

pub use decoder::{decode_response, decode_rows, DecodePolicy, DecodedJudgment};
pub use ladder::ThresholdLadder;
pub use labels::{encode_labels, LabelMatrix};
pub use tag::JudgmentTag;
