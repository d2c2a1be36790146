//! Convolutional building blocks for the shared encoder stage.
//!
//! The autoencoder and every threshold classifier are built from one
//! [`EncoderArchitecture`], which fixes the order and shapes of the encoder
//! tensors at the front of each model's [`WeightList`].

pub mod architecture;
pub mod autoencoder;
pub mod conv;
pub mod encoder;
pub mod loss;
pub mod optimizer;
pub mod sampling;
pub mod weights;

pub use architecture::{EncoderArchitecture, LayerRole, DEFAULT_CHANNELS};
pub use autoencoder::{
    train_autoencoder, Autoencoder, AutoencoderEpochMetrics, AutoencoderTrainingConfig,
    AutoencoderTrainingResult,
};
pub use conv::{Activation, Conv2d};
pub use encoder::Encoder;
pub use loss::{binary_cross_entropy, sigmoid_cross_entropy};
pub use optimizer::AdamOptimizer;
pub use weights::WeightList;
