//! Layer contract shared by the autoencoder and the classifier skeleton.
//!
//! Both builders derive their layer lists from the same
//! [`EncoderArchitecture`], so the encoder prefix of the weight list has a
//! named length instead of a hand-counted slice offset.

use serde::{Deserialize, Serialize};

use crate::error::{JudgmentError, JudgmentResult};

/// Side length of every convolution kernel.
pub const KERNEL_SIZE: usize = 3;

/// Pooling / upsampling factor per stage.
pub const POOL_FACTOR: usize = 2;

/// Tensors contributed to the weight list by one convolution (kernel, bias).
pub const TENSORS_PER_CONV: usize = 2;

/// Encoder channel widths used by the area-judgment experiments.
pub const DEFAULT_CHANNELS: [usize; 5] = [64, 32, 32, 32, 32];

/// Role a layer plays in the shared architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerRole {
    /// 3×3 same-padded ReLU convolution in the encoder
    EncoderConv { in_channels: usize, out_channels: usize },
    /// 2×2 max pooling after each encoder convolution
    EncoderPool,
    /// 3×3 same-padded ReLU convolution in the decoder
    DecoderConv { in_channels: usize, out_channels: usize },
    /// 2× nearest-neighbour upsampling after each decoder convolution
    DecoderUpsample,
    /// Final sigmoid convolution back to image channels
    OutputConv { in_channels: usize, out_channels: usize },
    /// Bias-free projection from the flattened embedding to the head units
    HeadDense { inputs: usize, units: usize },
}

impl LayerRole {
    /// Number of weight tensors this layer owns.
    pub fn tensor_count(&self) -> usize {
        match self {
            LayerRole::EncoderConv { .. }
            | LayerRole::DecoderConv { .. }
            | LayerRole::OutputConv { .. } => TENSORS_PER_CONV,
            LayerRole::HeadDense { .. } => 1,
            LayerRole::EncoderPool | LayerRole::DecoderUpsample => 0,
        }
    }

    /// Shapes of the tensors this layer contributes, in weight-list order.
    pub fn tensor_shapes(&self) -> Vec<Vec<usize>> {
        match *self {
            LayerRole::EncoderConv {
                in_channels,
                out_channels,
            }
            | LayerRole::DecoderConv {
                in_channels,
                out_channels,
            }
            | LayerRole::OutputConv {
                in_channels,
                out_channels,
            } => vec![
                vec![KERNEL_SIZE, KERNEL_SIZE, in_channels, out_channels],
                vec![out_channels],
            ],
            LayerRole::HeadDense { inputs, units } => vec![vec![units, inputs]],
            LayerRole::EncoderPool | LayerRole::DecoderUpsample => Vec::new(),
        }
    }
}

/// Input geometry plus the encoder's per-stage channel widths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderArchitecture {
    /// Image shape as (height, width, channels)
    pub input_shape: (usize, usize, usize),
    /// Output channels of each encoder convolution
    pub channels: Vec<usize>,
}

impl EncoderArchitecture {
    /// Validates that every stage can pool the image evenly.
    pub fn new(input_shape: (usize, usize, usize), channels: Vec<usize>) -> JudgmentResult<Self> {
        let (height, width, depth) = input_shape;
        if channels.is_empty() {
            return Err(JudgmentError::invalid_config(
                "architecture.channels",
                "[]",
                "the encoder needs at least one stage",
            ));
        }
        if channels.iter().any(|&c| c == 0) {
            return Err(JudgmentError::invalid_config(
                "architecture.channels",
                format!("{channels:?}"),
                "channel widths must be positive",
            ));
        }
        if depth == 0 {
            return Err(JudgmentError::invalid_config(
                "input_shape",
                format!("{input_shape:?}"),
                "images need at least one channel",
            ));
        }

        let divisor = POOL_FACTOR.pow(channels.len() as u32);
        if height == 0 || width == 0 || height % divisor != 0 || width % divisor != 0 {
            return Err(JudgmentError::invalid_config(
                "input_shape",
                format!("{input_shape:?}"),
                format!(
                    "height and width must be positive multiples of {divisor} for {} pooling stages",
                    channels.len()
                ),
            ));
        }

        Ok(Self {
            input_shape,
            channels,
        })
    }

    /// Architecture with [`DEFAULT_CHANNELS`].
    pub fn with_default_channels(input_shape: (usize, usize, usize)) -> JudgmentResult<Self> {
        Self::new(input_shape, DEFAULT_CHANNELS.to_vec())
    }

    pub fn stages(&self) -> usize {
        self.channels.len()
    }

    /// Length of the frozen encoder prefix in the weight list.
    pub fn prefix_len(&self) -> usize {
        self.encoder_roles()
            .iter()
            .map(LayerRole::tensor_count)
            .sum()
    }

    /// Spatial shape of the encoder output (height, width, channels).
    pub fn embedding_shape(&self) -> (usize, usize, usize) {
        let (height, width, _) = self.input_shape;
        let divisor = POOL_FACTOR.pow(self.stages() as u32);
        let depth = self.channels.last().copied().unwrap_or(0);
        (height / divisor, width / divisor, depth)
    }

    /// Length of the flattened encoder output.
    pub fn embedding_len(&self) -> usize {
        let (height, width, depth) = self.embedding_shape();
        height * width * depth
    }

    pub fn encoder_roles(&self) -> Vec<LayerRole> {
        let mut in_channels = self.input_shape.2;
        let mut roles = Vec::with_capacity(self.stages() * 2);
        for &out_channels in &self.channels {
            roles.push(LayerRole::EncoderConv {
                in_channels,
                out_channels,
            });
            roles.push(LayerRole::EncoderPool);
            in_channels = out_channels;
        }
        roles
    }

    /// Decoder mirrors the encoder widths in reverse, then projects to the
    /// image channels.
    pub fn decoder_roles(&self) -> Vec<LayerRole> {
        let mut in_channels = self.channels.last().copied().unwrap_or(0);
        let mut roles = Vec::with_capacity(self.stages() * 2 + 1);
        for &out_channels in self.channels.iter().rev() {
            roles.push(LayerRole::DecoderConv {
                in_channels,
                out_channels,
            });
            roles.push(LayerRole::DecoderUpsample);
            in_channels = out_channels;
        }
        roles.push(LayerRole::OutputConv {
            in_channels,
            out_channels: self.input_shape.2,
        });
        roles
    }

    pub fn head_role(&self, units: usize) -> LayerRole {
        LayerRole::HeadDense {
            inputs: self.embedding_len(),
            units,
        }
    }

    /// Shapes of the encoder prefix tensors, in weight-list order.
    pub fn prefix_shapes(&self) -> Vec<Vec<usize>> {
        self.encoder_roles()
            .iter()
            .flat_map(LayerRole::tensor_shapes)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_architecture_has_ten_prefix_tensors() {
        let arch = EncoderArchitecture::with_default_channels((64, 64, 3)).unwrap();
        assert_eq!(arch.prefix_len(), 10);
        assert_eq!(arch.embedding_shape(), (2, 2, 32));
        assert_eq!(arch.embedding_len(), 128);
    }

    #[test]
    fn prefix_shapes_follow_channel_widths() {
        let arch = EncoderArchitecture::new((8, 8, 3), vec![4, 2]).unwrap();
        assert_eq!(
            arch.prefix_shapes(),
            vec![vec![3, 3, 3, 4], vec![4], vec![3, 3, 4, 2], vec![2]]
        );
    }

    #[test]
    fn decoder_mirrors_encoder() {
        let arch = EncoderArchitecture::new((8, 8, 3), vec![4, 2]).unwrap();
        assert_eq!(
            arch.decoder_roles(),
            vec![
                LayerRole::DecoderConv {
                    in_channels: 2,
                    out_channels: 2
                },
                LayerRole::DecoderUpsample,
                LayerRole::DecoderConv {
                    in_channels: 2,
                    out_channels: 4
                },
                LayerRole::DecoderUpsample,
                LayerRole::OutputConv {
                    in_channels: 4,
                    out_channels: 3
                },
            ]
        );
    }

    #[test]
    fn indivisible_input_is_rejected() {
        let err = EncoderArchitecture::new((12, 12, 3), vec![4, 4, 4]).unwrap_err();
        assert!(matches!(err, JudgmentError::InvalidConfiguration { .. }));
    }

    #[test]
    fn empty_channel_list_is_rejected() {
        assert!(EncoderArchitecture::new((8, 8, 3), vec![]).is_err());
        assert!(EncoderArchitecture::new((8, 8, 3), vec![4, 0]).is_err());
    }
}
