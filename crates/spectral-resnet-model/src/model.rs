use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spectral_resnet_core::{Float, Tensor, TensorResult};
use spectral_resnet_nn::{
    AdaptiveAvgPool2D, BatchNorm2D, Conv2D, Dropout, FlattenLayer, Layer, Linear, MaxPool2D,
    ReLULayer, Sequential,
};

use crate::block::{Block, ResidualBlock};
use crate::config::{AudioCnnConfig, ConfigError};
use crate::feature_maps::FeatureMaps;
use crate::predict::{top_k, Prediction};

/// `(name, channels, blocks)` of each stage, in execution order. Every stage
/// after the first halves the resolution in its first block.
pub const STAGE_SPECS: [(&str, usize, usize); 4] = [
    ("layer1", 64, 3),
    ("layer2", 128, 4),
    ("layer3", 256, 6),
    ("layer4", 512, 3),
];

const STEM_CHANNELS: usize = 64;

/// A named run of residual blocks sharing one channel width.
pub struct Stage<T: Float> {
    name: &'static str,
    blocks: Vec<ResidualBlock<T>>,
}

impl<T: Float> Stage<T> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn blocks(&self) -> &[ResidualBlock<T>] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Run every block in order. Blocks record under `"{name}.block{i}"` and
    /// the stage output is recorded under `name`.
    fn forward(
        &self,
        x: &Tensor<T>,
        mut feature_maps: Option<&mut FeatureMaps<T>>,
    ) -> TensorResult<Tensor<T>> {
        let mut out = x.clone();
        for (i, block) in self.blocks.iter().enumerate() {
            let prefix = format!("{}.block{}", self.name, i);
            out = block.apply(&out, feature_maps.as_deref_mut(), &prefix)?;
        }
        if let Some(maps) = feature_maps {
            maps.insert(self.name, out.clone());
        }
        Ok(out)
    }
}

/// Result of [`AudioCnn::forward_mode`].
#[derive(Debug, Clone)]
pub enum Forward<T: Float> {
    Logits(Tensor<T>),
    WithFeatureMaps {
        logits: Tensor<T>,
        feature_maps: FeatureMaps<T>,
    },
}

impl<T: Float> Forward<T> {
    pub fn logits(&self) -> &Tensor<T> {
        match self {
            Forward::Logits(logits) | Forward::WithFeatureMaps { logits, .. } => logits,
        }
    }

    pub fn feature_maps(&self) -> Option<&FeatureMaps<T>> {
        match self {
            Forward::Logits(_) => None,
            Forward::WithFeatureMaps { feature_maps, .. } => Some(feature_maps),
        }
    }

    pub fn into_logits(self) -> Tensor<T> {
        match self {
            Forward::Logits(logits) | Forward::WithFeatureMaps { logits, .. } => logits,
        }
    }
}

/// ResNet-34 style classifier over `[batch, 1, freq, time]` spectrograms.
///
/// stem (conv 7×7/2, bn, relu, maxpool 3×3/2) → layer1..layer4 → global
/// average pool → flatten → dropout → linear. The input resolution shrinks
/// by a factor of 32 before pooling.
///
/// Forward passes take `&self`, so one model can serve several threads.
/// Shapes are only checked when data flows through; a mismatched input
/// surfaces as a [`TensorError`](spectral_resnet_core::TensorError) from the
/// first layer that cannot consume it.
pub struct AudioCnn<T: Float> {
    stem: Sequential<T>,
    stages: Vec<Stage<T>>,
    pool: AdaptiveAvgPool2D,
    flatten: FlattenLayer,
    dropout: Dropout,
    fc: Linear<T>,
    num_classes: usize,
    training: bool,
}

impl<T: Float> AudioCnn<T> {
    /// Default configuration with `num_classes` outputs.
    ///
    /// Nothing is validated here: `new(0)` builds a head with no outputs and
    /// produces `[batch, 0]` logits. Use [`AudioCnn::from_config`] to reject
    /// such values up front.
    pub fn new(num_classes: usize) -> Self {
        Self::build(&AudioCnnConfig::new(num_classes))
    }

    /// Validate `config` and build a model from it.
    pub fn from_config(config: &AudioCnnConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: &AudioCnnConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (eps, momentum) = (config.bn_eps, config.bn_momentum);

        let stem_conv: Conv2D<T> = Conv2D::new(1, STEM_CHANNELS, 7, 2, 3, false, &mut rng);
        let stem_norm: BatchNorm2D<T> = BatchNorm2D::with_options(STEM_CHANNELS, eps, momentum);
        let stem = Sequential::<T>::new()
            .add(Box::new(stem_conv))
            .add(Box::new(stem_norm))
            .add(Box::new(ReLULayer::new()))
            .add(Box::new(MaxPool2D::new(3, 2, 1)));

        let mut in_channels = STEM_CHANNELS;
        let mut stages = Vec::with_capacity(STAGE_SPECS.len());
        for (idx, &(name, channels, num_blocks)) in STAGE_SPECS.iter().enumerate() {
            let first_stride = if idx == 0 { 1 } else { 2 };
            let mut blocks = Vec::with_capacity(num_blocks);
            for b in 0..num_blocks {
                let stride = if b == 0 { first_stride } else { 1 };
                blocks.push(ResidualBlock::with_norm(in_channels, channels, stride, eps, momentum, &mut rng));
                in_channels = channels;
            }
            stages.push(Stage { name, blocks });
        }

        let dropout = Dropout::with_seed(config.dropout, Some(rng.gen()));
        let fc = Linear::new(in_channels, config.num_classes, &mut rng);

        let model = AudioCnn {
            stem,
            stages,
            pool: AdaptiveAvgPool2D::global(),
            flatten: FlattenLayer::new(),
            dropout,
            fc,
            num_classes: config.num_classes,
            training: true,
        };
        log::info!(
            "AudioCnn built: {} classes, {} parameters",
            model.num_classes,
            model.num_parameters()
        );
        model
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Class logits of shape `[batch, num_classes]`.
    pub fn forward(&self, x: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.run(x, None)
    }

    /// Logits plus every intermediate activation: `conv1`, then
    /// `{stage}.block{i}.conv`, `{stage}.block{i}.relu` per block and
    /// `{stage}` per stage. The logits equal those of [`AudioCnn::forward`].
    pub fn forward_with_feature_maps(&self, x: &Tensor<T>) -> TensorResult<(Tensor<T>, FeatureMaps<T>)> {
        let mut feature_maps = FeatureMaps::new();
        let logits = self.run(x, Some(&mut feature_maps))?;
        Ok((logits, feature_maps))
    }

    pub fn forward_mode(&self, x: &Tensor<T>, return_feature_maps: bool) -> TensorResult<Forward<T>> {
        if return_feature_maps {
            let (logits, feature_maps) = self.forward_with_feature_maps(x)?;
            Ok(Forward::WithFeatureMaps { logits, feature_maps })
        } else {
            self.forward(x).map(Forward::Logits)
        }
    }

    /// Softmax over the logits, keeping the `k` most probable `labels` per sample.
    pub fn predict(&self, x: &Tensor<T>, labels: &[&str], k: usize) -> TensorResult<Vec<Vec<Prediction>>> {
        top_k(&self.forward(x)?, labels, k)
    }

    fn run(&self, x: &Tensor<T>, mut feature_maps: Option<&mut FeatureMaps<T>>) -> TensorResult<Tensor<T>> {
        log::debug!(
            "AudioCnn forward: input {}, training = {}, recording = {}",
            x.shape(),
            self.training,
            feature_maps.is_some()
        );

        let mut out = self.stem.forward(x)?;
        if let Some(maps) = feature_maps.as_deref_mut() {
            maps.insert("conv1", out.clone());
        }
        for stage in &self.stages {
            out = stage.forward(&out, feature_maps.as_deref_mut())?;
            log::trace!("{} -> {}", stage.name, out.shape());
        }

        let pooled = self.flatten.forward(&self.pool.forward(&out)?)?;
        let logits = self.fc.forward(&self.dropout.forward(&pooled)?)?;

        log::debug!("AudioCnn forward: logits {}", logits.shape());
        Ok(logits)
    }

    /// Batch statistics and active dropout.
    pub fn train(&mut self) {
        self.set_training(true);
    }

    /// Running statistics and identity dropout.
    pub fn eval(&mut self) {
        self.set_training(false);
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        self.stem.set_training(training);
        for block in self.stages.iter_mut().flat_map(|s| s.blocks.iter_mut()) {
            block.set_training(training);
        }
        Layer::<T>::set_training(&mut self.dropout, training);
    }

    pub fn stages(&self) -> &[Stage<T>] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage<T>> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Learned tensors with hierarchical names such as `conv1.0.weight`,
    /// `layer2.0.shortcut.1.bias` and `fc.weight`.
    ///
    /// Convolution weights are `[out, in, k, k]`, `fc.weight` is
    /// `[num_classes, 512]` and every bias or batch-norm vector is 1-D.
    pub fn named_parameters(&self) -> Vec<(String, &Tensor<T>)> {
        let mut params: Vec<(String, &Tensor<T>)> = self
            .stem
            .named_parameters()
            .into_iter()
            .map(|(n, t)| (format!("conv1.{n}"), t))
            .collect();
        for stage in &self.stages {
            for (i, block) in stage.blocks.iter().enumerate() {
                params.extend(
                    block
                        .named_parameters()
                        .into_iter()
                        .map(|(n, t)| (format!("{}.{}.{}", stage.name, i, n), t)),
                );
            }
        }
        params.extend(self.fc.named_parameters().into_iter().map(|(n, t)| (format!("fc.{n}"), t)));
        params
    }

    pub fn parameters(&self) -> Vec<&Tensor<T>> {
        self.named_parameters().into_iter().map(|(_, t)| t).collect()
    }

    /// Total number of learned scalars.
    pub fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|t| t.numel()).sum()
    }
}

impl<T: Float> Default for AudioCnn<T> {
    fn default() -> Self {
        Self::build(&AudioCnnConfig::default())
    }
}
