//! # spectral-resnet
//!
//! A ResNet-style classifier for single-channel spectrograms, written in pure Rust.
//!
//! ## Modules
//!
//! - **core**: tensor engine with broadcasting, reductions and matmul
//! - **nn**: Conv2D, BatchNorm2D, pooling, Dropout, Linear and Sequential layers
//! - **model**: AudioCnn, ResidualBlock, feature-map capture, configuration
//!
//! ```no_run
//! use spectral_resnet::core::Tensor;
//! use spectral_resnet::model::AudioCnn;
//!
//! let mut model: AudioCnn<f32> = AudioCnn::new(50);
//! model.eval();
//! let spectrogram = Tensor::randn(vec![1, 1, 128, 128], Some(0));
//! let (logits, feature_maps) = model.forward_with_feature_maps(&spectrogram)?;
//! assert_eq!(logits.shape_vec(), vec![1, 50]);
//! assert_eq!(feature_maps.len(), 37);
//! # Ok::<(), spectral_resnet::core::TensorError>(())
//! ```

/// Core tensor engine.
pub use spectral_resnet_core as core;

/// Neural network layers.
pub use spectral_resnet_nn as nn;

/// The audio classifier.
pub use spectral_resnet_model as model;

pub use spectral_resnet_model::{AudioCnn, AudioCnnConfig, FeatureMaps, LayerData, Prediction, ResidualBlock};
