//! Threshold classifier: frozen convolutional encoder plus a trainable head.
//!
//! A classifier starts as a *skeleton* built from an [`EncoderArchitecture`]
//! (fresh encoder, fresh head). The encoder prefix is then overwritten by
//! [`transplant`](super::transplant::transplant) and frozen; from then on only
//! the head is optimized.

use std::path::Path;

use ndarray::{Array2, ArrayD, ArrayView4};
use serde::{Deserialize, Serialize};

use super::head::ThresholdHead;
use crate::checkpoint::{check_version, CheckpointError, Checkpointable};
use crate::error::{JudgmentError, JudgmentResult};
use crate::neural::{Encoder, EncoderArchitecture, WeightList};
use crate::reference::JudgmentTag;

const CLASSIFIER_CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdClassifier {
    architecture: EncoderArchitecture,
    tag: JudgmentTag,
    encoder: Encoder,
    head: ThresholdHead,
    frozen_prefix: usize,
}

impl ThresholdClassifier {
    /// Freshly initialized classifier with `units` head outputs.
    pub fn skeleton(
        architecture: EncoderArchitecture,
        tag: JudgmentTag,
        units: usize,
        seed: u64,
    ) -> JudgmentResult<Self> {
        if units == 0 {
            return Err(JudgmentError::invalid_config(
                "head.units",
                units,
                "a threshold head needs at least one unit",
            ));
        }
        let encoder = Encoder::new(&architecture, seed);
        let head = ThresholdHead::for_role(architecture.head_role(units), seed.wrapping_add(1))?;
        Ok(Self {
            architecture,
            tag,
            encoder,
            head,
            frozen_prefix: 0,
        })
    }

    pub fn architecture(&self) -> &EncoderArchitecture {
        &self.architecture
    }

    pub fn tag(&self) -> JudgmentTag {
        self.tag
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn head(&self) -> &ThresholdHead {
        &self.head
    }

    pub(crate) fn head_mut(&mut self) -> &mut ThresholdHead {
        &mut self.head
    }

    pub fn units(&self) -> usize {
        self.head.units()
    }

    /// Marks the whole encoder prefix as excluded from optimization.
    pub fn freeze_prefix(&mut self) {
        self.frozen_prefix = self.architecture.prefix_len();
    }

    /// Number of leading weight tensors excluded from optimization.
    pub fn frozen_prefix(&self) -> usize {
        self.frozen_prefix
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_prefix == self.architecture.prefix_len()
    }

    /// Flattened encoder output for each image.
    pub fn embed(&self, images: ArrayView4<'_, f32>) -> JudgmentResult<Array2<f32>> {
        let (_, height, width, depth) = images.dim();
        if (height, width, depth) != self.architecture.input_shape {
            let (h, w, c) = self.architecture.input_shape;
            return Err(JudgmentError::shape_mismatch(
                format!("{} classifier input", self.tag),
                &[h, w, c],
                &[height, width, depth],
            ));
        }
        Ok(self.encoder.encode_batch(images))
    }

    /// Softmax activations of the head.
    pub fn activations(&self, images: ArrayView4<'_, f32>) -> JudgmentResult<Array2<f32>> {
        let embeddings = self.embed(images)?;
        Ok(self.head.activations(embeddings.view()))
    }

    /// Integerized `N×K` head output.
    pub fn predict(&self, images: ArrayView4<'_, f32>) -> JudgmentResult<Array2<u8>> {
        let embeddings = self.embed(images)?;
        Ok(self.head.predict(embeddings.view()))
    }

    /// Sole writer of the encoder prefix slots.
    pub(crate) fn write_prefix(&mut self, tensors: &[ArrayD<f32>]) -> JudgmentResult<()> {
        self.encoder.load_tensors(tensors)
    }
}

impl WeightList for ThresholdClassifier {
    fn weights(&self) -> Vec<ArrayD<f32>> {
        let mut weights = self.encoder.weight_tensors();
        weights.push(self.head.dense.clone().into_dyn());
        weights
    }

    fn prefix_len(&self) -> usize {
        self.architecture.prefix_len()
    }
}

#[derive(Serialize, Deserialize)]
struct ClassifierCheckpoint {
    version: u32,
    architecture: EncoderArchitecture,
    tag: JudgmentTag,
    frozen_prefix: usize,
    encoder: Encoder,
    head: ThresholdHead,
}

impl Checkpointable for ThresholdClassifier {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let snapshot = ClassifierCheckpoint {
            version: CLASSIFIER_CHECKPOINT_VERSION,
            architecture: self.architecture.clone(),
            tag: self.tag,
            frozen_prefix: self.frozen_prefix,
            encoder: self.encoder.clone(),
            head: self.head.clone(),
        };
        Self::write_snapshot(&snapshot, path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let snapshot: ClassifierCheckpoint = Self::read_snapshot(path)?;
        check_version(CLASSIFIER_CHECKPOINT_VERSION, snapshot.version)?;

        if !snapshot.encoder.matches(&snapshot.architecture) {
            return Err(CheckpointError::InvalidFormat(
                "encoder tensors do not match the stored architecture".to_string(),
            ));
        }
        if snapshot.head.inputs() != snapshot.architecture.embedding_len()
            || snapshot.head.units() == 0
        {
            return Err(CheckpointError::InvalidFormat(format!(
                "head shape {:?} does not fit embedding length {}",
                snapshot.head.dense.dim(),
                snapshot.architecture.embedding_len()
            )));
        }
        if snapshot.frozen_prefix != 0 && snapshot.frozen_prefix != snapshot.architecture.prefix_len() {
            return Err(CheckpointError::InvalidFormat(format!(
                "frozen prefix {} is neither 0 nor the encoder prefix length",
                snapshot.frozen_prefix
            )));
        }

        Ok(Self {
            architecture: snapshot.architecture,
            tag: snapshot.tag,
            encoder: snapshot.encoder,
            head: snapshot.head,
            frozen_prefix: snapshot.frozen_prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn architecture() -> EncoderArchitecture {
        EncoderArchitecture::new((8, 8, 3), vec![4, 2]).unwrap()
    }

    #[test]
    fn skeleton_weight_list_is_prefix_plus_head() {
        let classifier = ThresholdClassifier::skeleton(architecture(), JudgmentTag::MeanArea, 5, 1).unwrap();
        assert_eq!(classifier.prefix_len(), 4);
        assert_eq!(classifier.weight_count(), 5);
        assert_eq!(classifier.weight_shapes()[4], vec![5, 8]);
        assert_eq!(
            classifier.weight_shapes()[4..].to_vec(),
            architecture().head_role(5).tensor_shapes()
        );
        assert!(!classifier.is_frozen());
    }

    #[test]
    fn zero_units_is_invalid() {
        let err = ThresholdClassifier::skeleton(architecture(), JudgmentTag::Default, 0, 1).unwrap_err();
        assert!(matches!(err, JudgmentError::InvalidConfiguration { .. }));
    }

    #[test]
    fn predictions_are_binary_rows() {
        let classifier = ThresholdClassifier::skeleton(architecture(), JudgmentTag::MeanArea, 6, 2).unwrap();
        let images = Array4::from_shape_fn((4, 8, 8, 3), |(n, y, x, _)| ((n + y + x) % 3) as f32 / 2.0);
        let predicted = classifier.predict(images.view()).unwrap();
        assert_eq!(predicted.dim(), (4, 6));
        assert!(predicted.iter().all(|&b| b <= 1));
    }

    #[test]
    fn wrong_image_shape_is_rejected() {
        let classifier = ThresholdClassifier::skeleton(architecture(), JudgmentTag::MeanArea, 3, 2).unwrap();
        let images = Array4::<f32>::zeros((1, 16, 16, 3));
        assert!(matches!(
            classifier.predict(images.view()),
            Err(JudgmentError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn checkpoint_roundtrip_keeps_frozen_prefix() {
        let mut classifier =
            ThresholdClassifier::skeleton(architecture(), JudgmentTag::AggregateArea, 4, 3).unwrap();
        classifier.freeze_prefix();

        let path = std::env::temp_dir().join(format!("head_{}.bin", uuid::Uuid::new_v4()));
        classifier.save_checkpoint(&path).expect("save checkpoint");
        let restored = ThresholdClassifier::load_checkpoint(&path).expect("load checkpoint");
        std::fs::remove_file(&path).ok();

        assert_eq!(restored, classifier);
        assert!(restored.is_frozen());
        assert_eq!(restored.tag(), JudgmentTag::AggregateArea);
    }
}
