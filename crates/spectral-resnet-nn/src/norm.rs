use std::sync::{PoisonError, RwLock};

use spectral_resnet_core::{Float, Tensor, TensorError, TensorResult};

use super::layers::Layer;

/// Per-channel statistics accumulated across training batches.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningStats<T: Float> {
    pub mean: Vec<T>,
    pub var: Vec<T>,
    pub num_batches_tracked: u64,
}

/// Batch Normalization over the channel axis of `[batch, channels, h, w]`.
///
/// y = (x - μ) / √(σ² + ε) * γ + β
///
/// In training mode μ and σ² are the batch statistics over `(batch, h, w)`
/// and the running estimates move toward them by `momentum` (the variance
/// with Bessel's correction). In eval mode the running estimates are used.
///
/// Running statistics sit behind a lock so that `forward` takes `&self`;
/// eval-mode calls only ever read them.
pub struct BatchNorm2D<T: Float> {
    pub num_features: usize,
    pub eps: f64,
    pub momentum: f64,
    pub gamma: Tensor<T>, // [num_features]
    pub beta: Tensor<T>,  // [num_features]
    pub training: bool,
    running: RwLock<RunningStats<T>>,
}

impl<T: Float> BatchNorm2D<T> {
    pub fn new(num_features: usize) -> Self {
        Self::with_options(num_features, 1e-5, 0.1)
    }

    pub fn with_options(num_features: usize, eps: f64, momentum: f64) -> Self {
        BatchNorm2D {
            num_features,
            eps,
            momentum,
            gamma: Tensor::ones(vec![num_features]),
            beta: Tensor::zeros(vec![num_features]),
            training: true,
            running: RwLock::new(RunningStats {
                mean: vec![T::ZERO; num_features],
                var: vec![T::ONE; num_features],
                num_batches_tracked: 0,
            }),
        }
    }

    pub fn eval(&mut self) { self.training = false; }

    /// Snapshot of the running statistics.
    pub fn running_stats(&self) -> RunningStats<T> {
        self.running.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the running statistics, e.g. when restoring a trained model.
    pub fn set_running_stats(&mut self, mean: Vec<T>, var: Vec<T>) -> TensorResult<()> {
        for v in [&mean, &var] {
            if v.len() != self.num_features {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![self.num_features],
                    got: vec![v.len()],
                });
            }
        }
        let stats = self.running.get_mut().unwrap_or_else(PoisonError::into_inner);
        stats.mean = mean;
        stats.var = var;
        Ok(())
    }

    /// Mean and biased variance of every channel, accumulated in f64.
    fn batch_stats(x: &[T], batch: usize, channels: usize, plane: usize) -> (Vec<f64>, Vec<f64>) {
        let count = (batch * plane) as f64;
        let mut mean = vec![0.0f64; channels];
        let mut var = vec![0.0f64; channels];
        for c in 0..channels {
            let mut sum = 0.0;
            for b in 0..batch {
                let start = (b * channels + c) * plane;
                sum += x[start..start + plane].iter().map(|v| v.to_f64()).sum::<f64>();
            }
            let m = sum / count;
            let mut sq = 0.0;
            for b in 0..batch {
                let start = (b * channels + c) * plane;
                sq += x[start..start + plane]
                    .iter()
                    .map(|v| (v.to_f64() - m).powi(2))
                    .sum::<f64>();
            }
            mean[c] = m;
            var[c] = sq / count;
        }
        (mean, var)
    }
}

impl<T: Float> Layer<T> for BatchNorm2D<T> {
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let (batch, channels, h, w) = input.shape().nchw()?;
        if channels != self.num_features {
            return Err(TensorError::ChannelMismatch {
                layer: "BatchNorm2D",
                expected: self.num_features,
                got: channels,
            });
        }
        let plane = h * w;
        let x = input.data();

        let (mean, var): (Vec<f64>, Vec<f64>) = if self.training {
            let count = batch * plane;
            if count < 2 {
                return Err(TensorError::InvalidOperation(format!(
                    "BatchNorm2D needs more than one value per channel in training mode, got input shape {}",
                    input.shape()
                )));
            }
            let (mean, var) = Self::batch_stats(x, batch, channels, plane);

            let mut running = self.running.write().unwrap_or_else(PoisonError::into_inner);
            let m = self.momentum;
            let bessel = count as f64 / (count - 1) as f64;
            for c in 0..channels {
                let rm = running.mean[c].to_f64();
                let rv = running.var[c].to_f64();
                running.mean[c] = T::from_f64((1.0 - m) * rm + m * mean[c]);
                running.var[c] = T::from_f64((1.0 - m) * rv + m * var[c] * bessel);
            }
            running.num_batches_tracked += 1;
            log::trace!(
                "BatchNorm2D({}) running stats updated, batches tracked = {}",
                channels,
                running.num_batches_tracked
            );
            (mean, var)
        } else {
            let running = self.running.read().unwrap_or_else(PoisonError::into_inner);
            (
                running.mean.iter().map(|v| v.to_f64()).collect(),
                running.var.iter().map(|v| v.to_f64()).collect(),
            )
        };

        // Fold normalisation and affine transform into one scale/shift per channel.
        let gamma = self.gamma.data();
        let beta = self.beta.data();
        let (scale, shift): (Vec<T>, Vec<T>) = (0..channels)
            .map(|c| {
                let s = gamma[c].to_f64() / (var[c] + self.eps).sqrt();
                (T::from_f64(s), T::from_f64(beta[c].to_f64() - mean[c] * s))
            })
            .unzip();

        let mut output = input.clone();
        for (i, chunk) in output.data_mut().chunks_mut(plane.max(1)).enumerate() {
            let c = i % channels;
            for v in chunk.iter_mut() {
                *v = *v * scale[c] + shift[c];
            }
        }
        Ok(output)
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor<T>)> {
        vec![("weight".into(), &self.gamma), ("bias".into(), &self.beta)]
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}
