use crate::layers::Layer;
use spectral_resnet_core::{Float, Tensor, TensorResult};

/// Chains layers in order.
///
/// Parameter names are prefixed with the layer's position, so the weight
/// of the first layer is `0.weight`.
pub struct Sequential<T: Float> {
    layers: Vec<Box<dyn Layer<T>>>,
}

impl<T: Float> Sequential<T> {
    pub fn new() -> Self {
        Sequential { layers: Vec::new() }
    }

    /// Add a layer to the model.
    pub fn add(mut self, layer: Box<dyn Layer<T>>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl<T: Float> Layer<T> for Sequential<T> {
    /// Forward pass through all layers.
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let mut layers = self.layers.iter();
        let Some(first) = layers.next() else {
            return Ok(input.clone());
        };
        let mut x = first.forward(input)?;
        for layer in layers {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor<T>)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| {
                layer
                    .named_parameters()
                    .into_iter()
                    .map(move |(name, t)| (format!("{}.{}", i, name), t))
            })
            .collect()
    }

    fn set_training(&mut self, training: bool) {
        for layer in &mut self.layers {
            layer.set_training(training);
        }
    }
}

impl<T: Float> Default for Sequential<T> {
    fn default() -> Self {
        Self::new()
    }
}
