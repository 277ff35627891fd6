//! ResNet-style audio classifier over single-channel spectrograms.
//!
//! [`AudioCnn`] stacks a 7×7 stem and four stages of [`ResidualBlock`]s
//! (3/4/6/3 blocks, 64→512 channels) ahead of global pooling and a linear
//! head. [`AudioCnn::forward_with_feature_maps`] additionally returns the
//! intermediate activations in a [`FeatureMaps`] collection, which
//! [`FeatureMaps::layer_data`] reduces to plottable 2-D grids.
//! [`AudioCnn::predict`] turns logits into labelled [`Prediction`]s.

pub mod block;
pub mod config;
pub mod feature_maps;
pub mod model;
pub mod predict;

pub use block::{Block, ResidualBlock};
pub use config::{AudioCnnConfig, ConfigError};
pub use feature_maps::{FeatureMaps, LayerData};
pub use model::{AudioCnn, Forward, Stage, STAGE_SPECS};
pub use predict::{softmax, top_k, Prediction, ESC50_CLASSES};
