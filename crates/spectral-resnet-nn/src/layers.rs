use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spectral_resnet_core::{Float, Tensor, TensorError, TensorResult};

/// Trait for a neural network layer.
pub trait Layer<T: Float>: Send + Sync {
    /// Forward pass.
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>>;

    /// Learned tensors keyed by their local name (`weight`, `0.bias`, ...).
    fn named_parameters(&self) -> Vec<(String, &Tensor<T>)> {
        Vec::new()
    }

    /// Return all trainable parameters.
    fn parameters(&self) -> Vec<&Tensor<T>> {
        self.named_parameters().into_iter().map(|(_, t)| t).collect()
    }

    /// Switch between training and inference behaviour. Stateless layers ignore it.
    fn set_training(&mut self, _training: bool) {}
}

/// Fully connected (dense) layer: y = xWᵀ + b.
pub struct Linear<T: Float> {
    pub weight: Tensor<T>, // [out_features, in_features]
    pub bias: Tensor<T>,   // [out_features]
    pub in_features: usize,
    pub out_features: usize,
}

impl<T: Float> Linear<T> {
    /// Weights and bias drawn from U(-1/√in, 1/√in).
    pub fn new<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_features.max(1) as f64).sqrt();
        Linear {
            weight: Tensor::uniform_with(vec![out_features, in_features], -bound, bound, rng),
            bias: Tensor::uniform_with(vec![out_features], -bound, bound, rng),
            in_features,
            out_features,
        }
    }
}

impl<T: Float> Layer<T> for Linear<T> {
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        if input.ndim() != 2 {
            return Err(TensorError::DimensionMismatch(format!(
                "Linear expects [batch, {}] input, got shape {}",
                self.in_features,
                input.shape()
            )));
        }
        input.matmul(&self.weight.transpose()?)?.add(&self.bias)
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor<T>)> {
        vec![("weight".into(), &self.weight), ("bias".into(), &self.bias)]
    }
}

/// ReLU activation layer.
pub struct ReLULayer;

impl ReLULayer {
    pub fn new() -> Self { ReLULayer }
}

impl<T: Float> Layer<T> for ReLULayer {
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        Ok(input.relu())
    }
}

impl Default for ReLULayer {
    fn default() -> Self { Self::new() }
}

/// Randomly zeros elements during training.
/// During inference, acts as identity.
pub struct Dropout {
    pub p: f64,
    pub training: bool,
    rng: Mutex<StdRng>,
}

impl Dropout {
    pub fn new(p: f64) -> Self {
        Self::with_seed(p, None)
    }

    /// Dropout whose masks come from a seeded generator.
    pub fn with_seed(p: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Dropout {
            p,
            training: true,
            rng: Mutex::new(rng),
        }
    }

    pub fn eval(&mut self) { self.training = false; }
}

impl<T: Float> Layer<T> for Dropout {
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        if !self.training || self.p <= 0.0 {
            return Ok(input.clone());
        }
        if self.p >= 1.0 {
            return Ok(Tensor::zeros(input.shape_vec()));
        }
        // Survivors are rescaled so the expected activation is unchanged.
        let scale = T::from_f64(1.0 / (1.0 - self.p));
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let mut output = input.clone();
        for x in output.data_mut() {
            *x = if rng.gen::<f64>() < self.p { T::ZERO } else { *x * scale };
        }
        Ok(output)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

impl Default for Dropout {
    fn default() -> Self { Self::new(0.5) }
}

/// Reshapes input to [batch_size, features].
pub struct FlattenLayer;

impl FlattenLayer {
    pub fn new() -> Self { FlattenLayer }
}

impl<T: Float> Layer<T> for FlattenLayer {
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let shape = input.shape().dims();
        match shape.len() {
            0 => Err(TensorError::InvalidOperation(
                "cannot flatten a 0-d tensor".to_string(),
            )),
            1 | 2 => Ok(input.clone()),
            _ => {
                let batch = shape[0];
                let features: usize = shape[1..].iter().product();
                input.reshape(vec![batch, features])
            }
        }
    }
}

impl Default for FlattenLayer {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_linear_shape_and_values() {
        let mut linear: Linear<f64> = Linear::new(3, 2, &mut rng());
        linear.weight = Tensor::new(vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0], vec![2, 3]).unwrap();
        linear.bias = Tensor::from_slice(&[0.5, -0.5]);

        let x = Tensor::new(vec![1.0, 2.0, 3.0, 0.0, 0.0, 1.0], vec![2, 3]).unwrap();
        let y = linear.forward(&x).unwrap();
        assert_eq!(y.shape_vec(), vec![2, 2]);
        assert_eq!(y.data(), &[4.5, 4.5, 1.5, 0.5]);
        assert_eq!(Layer::<f64>::parameters(&linear).len(), 2);
    }

    #[test]
    fn test_linear_init_bounds() {
        let linear: Linear<f32> = Linear::new(512, 50, &mut rng());
        let bound = 1.0 / (512f32).sqrt();
        assert!(linear.weight.max_all().unwrap() <= bound);
        assert!(linear.weight.min_all().unwrap() >= -bound);
        assert_eq!(linear.weight.shape_vec(), vec![50, 512]);
        assert_eq!(linear.bias.shape_vec(), vec![50]);
    }

    #[test]
    fn test_linear_rejects_wrong_width() {
        let linear: Linear<f32> = Linear::new(4, 2, &mut rng());
        assert!(linear.forward(&Tensor::zeros(vec![1, 5])).is_err());
        assert!(linear.forward(&Tensor::zeros(vec![1, 4, 1, 1])).is_err());
    }

    #[test]
    fn test_dropout_eval_is_identity() {
        let mut dropout = Dropout::with_seed(0.5, Some(1));
        dropout.eval();
        let x: Tensor<f32> = Tensor::rand(vec![4, 16], Some(2));
        assert_eq!(dropout.forward(&x).unwrap(), x);
    }

    #[test]
    fn test_dropout_training_masks_and_scales() {
        let dropout = Dropout::with_seed(0.5, Some(1));
        let x: Tensor<f64> = Tensor::ones(vec![1, 10_000]);
        let y = dropout.forward(&x).unwrap();
        assert!(y.data().iter().all(|&v| v == 0.0 || v == 2.0));
        let kept = y.data().iter().filter(|&&v| v != 0.0).count() as f64 / 10_000.0;
        assert_abs_diff_eq!(kept, 0.5, epsilon = 0.05);
    }

    #[test]
    fn test_dropout_extremes() {
        let x: Tensor<f32> = Tensor::ones(vec![2, 3]);
        assert_eq!(Dropout::with_seed(0.0, Some(0)).forward(&x).unwrap(), x);
        assert_eq!(Dropout::with_seed(1.0, Some(0)).forward(&x).unwrap().sum_all(), 0.0);
    }

    #[test]
    fn test_flatten() {
        let x: Tensor<f32> = Tensor::rand(vec![2, 512, 1, 1], Some(0));
        let y = FlattenLayer.forward(&x).unwrap();
        assert_eq!(y.shape_vec(), vec![2, 512]);
        assert_eq!(y.data(), x.data());
    }

    #[test]
    fn test_relu_layer() {
        let x: Tensor<f32> = Tensor::from_slice(&[-1.0, 2.0]);
        assert_eq!(ReLULayer.forward(&x).unwrap().data(), &[0.0, 2.0]);
    }
}
