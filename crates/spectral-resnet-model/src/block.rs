use rand::Rng;
use spectral_resnet_core::{Float, Tensor, TensorResult};
use spectral_resnet_nn::{BatchNorm2D, Conv2D, Layer, Sequential};

use crate::feature_maps::FeatureMaps;

/// A unit that can be stacked inside a stage.
///
/// `apply` is `forward` with optional instrumentation: when `feature_maps` is
/// given, the block records its intermediate tensors under keys starting with
/// `prefix`. Recording never changes the returned tensor.
pub trait Block<T: Float>: Layer<T> {
    fn apply(
        &self,
        x: &Tensor<T>,
        feature_maps: Option<&mut FeatureMaps<T>>,
        prefix: &str,
    ) -> TensorResult<Tensor<T>>;
}

/// Basic two-convolution residual block.
///
/// ```text
/// x ─ conv3x3(stride) ─ bn ─ relu ─ conv3x3 ─ bn ─ (+) ─ relu
///  └──────────── identity | conv1x1(stride) ─ bn ───┘
/// ```
///
/// The shortcut is projected exactly when the block changes the spatial
/// resolution or the channel count.
pub struct ResidualBlock<T: Float> {
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    conv1: Conv2D<T>,
    bn1: BatchNorm2D<T>,
    conv2: Conv2D<T>,
    bn2: BatchNorm2D<T>,
    shortcut: Option<Sequential<T>>,
}

impl<T: Float> ResidualBlock<T> {
    pub fn new<R: Rng>(in_channels: usize, out_channels: usize, stride: usize, rng: &mut R) -> Self {
        Self::with_norm(in_channels, out_channels, stride, 1e-5, 0.1, rng)
    }

    /// Same as [`ResidualBlock::new`] with explicit batch-norm `eps` and `momentum`.
    pub fn with_norm<R: Rng>(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        eps: f64,
        momentum: f64,
        rng: &mut R,
    ) -> Self {
        let conv1 = Conv2D::new(in_channels, out_channels, 3, stride, 1, false, rng);
        let bn1 = BatchNorm2D::with_options(out_channels, eps, momentum);
        let conv2 = Conv2D::new(out_channels, out_channels, 3, 1, 1, false, rng);
        let bn2 = BatchNorm2D::with_options(out_channels, eps, momentum);

        let shortcut = (stride != 1 || in_channels != out_channels).then(|| {
            let projection: Conv2D<T> = Conv2D::new(in_channels, out_channels, 1, stride, 0, false, rng);
            let norm: BatchNorm2D<T> = BatchNorm2D::with_options(out_channels, eps, momentum);
            Sequential::<T>::new().add(Box::new(projection)).add(Box::new(norm))
        });

        ResidualBlock { in_channels, out_channels, stride, conv1, bn1, conv2, bn2, shortcut }
    }

    pub fn in_channels(&self) -> usize { self.in_channels }
    pub fn out_channels(&self) -> usize { self.out_channels }
    pub fn stride(&self) -> usize { self.stride }

    /// Whether the shortcut is a 1×1 projection rather than the identity.
    pub fn has_projection(&self) -> bool {
        self.shortcut.is_some()
    }

    pub fn forward_with_maps(
        &self,
        x: &Tensor<T>,
        feature_maps: Option<&mut FeatureMaps<T>>,
        prefix: &str,
    ) -> TensorResult<Tensor<T>> {
        let out = self.bn1.forward(&self.conv1.forward(x)?)?.relu();
        let out = self.bn2.forward(&self.conv2.forward(&out)?)?;

        let sum = match &self.shortcut {
            Some(shortcut) => out.add(&shortcut.forward(x)?)?,
            None => out.add(x)?,
        };
        let activated = sum.relu();

        if let Some(maps) = feature_maps {
            maps.insert(format!("{prefix}.conv"), sum);
            maps.insert(format!("{prefix}.relu"), activated.clone());
        }
        Ok(activated)
    }
}

impl<T: Float> Layer<T> for ResidualBlock<T> {
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.forward_with_maps(input, None, "")
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor<T>)> {
        let mut params = Vec::new();
        let parts: [(&str, &dyn Layer<T>); 4] = [
            ("conv1", &self.conv1),
            ("bn1", &self.bn1),
            ("conv2", &self.conv2),
            ("bn2", &self.bn2),
        ];
        for (prefix, layer) in parts {
            params.extend(layer.named_parameters().into_iter().map(|(n, t)| (format!("{prefix}.{n}"), t)));
        }
        if let Some(shortcut) = &self.shortcut {
            params.extend(shortcut.named_parameters().into_iter().map(|(n, t)| (format!("shortcut.{n}"), t)));
        }
        params
    }

    fn set_training(&mut self, training: bool) {
        self.bn1.set_training(training);
        self.bn2.set_training(training);
        if let Some(shortcut) = &mut self.shortcut {
            shortcut.set_training(training);
        }
    }
}

impl<T: Float> Block<T> for ResidualBlock<T> {
    fn apply(
        &self,
        x: &Tensor<T>,
        feature_maps: Option<&mut FeatureMaps<T>>,
        prefix: &str,
    ) -> TensorResult<Tensor<T>> {
        self.forward_with_maps(x, feature_maps, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use spectral_resnet_core::TensorError;

    fn block(in_channels: usize, out_channels: usize, stride: usize) -> ResidualBlock<f32> {
        let mut rng = StdRng::seed_from_u64(7);
        ResidualBlock::new(in_channels, out_channels, stride, &mut rng)
    }

    #[test]
    fn test_identity_block_preserves_shape() {
        let b = block(8, 8, 1);
        assert!(!b.has_projection());
        let y = b.forward(&Tensor::randn(vec![2, 8, 6, 6], Some(1))).unwrap();
        assert_eq!(y.shape_vec(), vec![2, 8, 6, 6]);
        assert!(y.min_all().unwrap() >= 0.0);
    }

    #[test]
    fn test_projection_block_downsamples() {
        let b = block(8, 16, 2);
        assert!(b.has_projection());
        assert_eq!((b.in_channels(), b.out_channels(), b.stride()), (8, 16, 2));
        let y = b.forward(&Tensor::randn(vec![2, 8, 6, 6], Some(1))).unwrap();
        assert_eq!(y.shape_vec(), vec![2, 16, 3, 3]);

        assert!(block(8, 16, 1).has_projection());
        assert!(block(8, 8, 2).has_projection());
    }

    #[test]
    fn test_recording_keeps_output_identical() {
        let mut b = block(4, 8, 2);
        b.set_training(false);
        let x = Tensor::randn(vec![1, 4, 8, 8], Some(3));

        let plain = b.forward(&x).unwrap();
        let mut maps = FeatureMaps::new();
        let recorded = b.apply(&x, Some(&mut maps), "layer2.block0").unwrap();
        assert_eq!(plain, recorded);

        let keys: Vec<&str> = maps.keys().collect();
        assert_eq!(keys, vec!["layer2.block0.conv", "layer2.block0.relu"]);
        assert_eq!(maps.get("layer2.block0.relu").unwrap(), &recorded);
        assert_eq!(maps.get("layer2.block0.conv").unwrap().relu(), recorded);
    }

    #[test]
    fn test_identity_shortcut_adds_input() {
        // With zeroed convolutions the residual branch vanishes after bn2.
        let mut b = block(2, 2, 1);
        b.set_training(false);
        b.conv1.weight = Tensor::zeros(b.conv1.weight.shape_vec());
        b.conv2.weight = Tensor::zeros(b.conv2.weight.shape_vec());
        let x = Tensor::randn(vec![1, 2, 3, 3], Some(5));
        let y = b.forward(&x).unwrap();
        assert!(y.max_abs_diff(&x.relu()).unwrap() < 1e-6);
    }

    #[test]
    fn test_channel_mismatch_is_error() {
        let b = block(4, 4, 1);
        assert!(matches!(
            b.forward(&Tensor::ones(vec![1, 3, 4, 4])),
            Err(TensorError::ChannelMismatch { expected: 4, got: 3, .. })
        ));
    }

    #[test]
    fn test_named_parameters() {
        let names: Vec<String> = block(4, 8, 2).named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "conv1.weight", "bn1.weight", "bn1.bias",
                "conv2.weight", "bn2.weight", "bn2.bias",
                "shortcut.0.weight", "shortcut.1.weight", "shortcut.1.bias",
            ]
        );
        assert_eq!(block(4, 4, 1).parameters().len(), 6);
    }
}
