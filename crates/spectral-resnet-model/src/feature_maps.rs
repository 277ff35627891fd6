use std::fmt;

use serde::{Deserialize, Serialize};
use spectral_resnet_core::{Float, Tensor, TensorError, TensorResult};

/// A 2-D view of one activation, ready for plotting as a heat map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerData {
    /// `[height, width]` of `values`.
    pub shape: Vec<usize>,
    pub values: Vec<Vec<f64>>,
}

impl LayerData {
    /// Average the channels of sample `batch_index` of a `[batch, channels, h, w]`
    /// activation into an `h × w` grid. Non-finite values become 0.
    pub fn from_activation<T: Float>(tensor: &Tensor<T>, batch_index: usize) -> TensorResult<Self> {
        let (batch, channels, h, w) = tensor.shape().nchw()?;
        if batch_index >= batch {
            return Err(TensorError::IndexOutOfBounds { index: batch_index, axis: 0, size: batch });
        }
        if channels == 0 {
            return Err(TensorError::EmptyTensor);
        }
        let plane = h * w;
        let sample = &tensor.data()[batch_index * channels * plane..(batch_index + 1) * channels * plane];

        let mut sums = vec![0.0f64; plane];
        for channel in sample.chunks(plane.max(1)) {
            for (s, v) in sums.iter_mut().zip(channel) {
                *s += v.to_f64();
            }
        }
        let values = sums
            .chunks(w.max(1))
            .take(h)
            .map(|row| {
                row.iter()
                    .map(|s| s / channels as f64)
                    .map(|m| if m.is_finite() { m } else { 0.0 })
                    .collect()
            })
            .collect();
        Ok(LayerData { shape: vec![h, w], values })
    }
}

/// Named intermediate activations captured during one forward pass.
///
/// Keys are hierarchical (`"layer2.block1.relu"`) and iteration follows
/// insertion order, which is the order the model executed them in.
#[derive(Clone)]
pub struct FeatureMaps<T: Float> {
    entries: Vec<(String, Tensor<T>)>,
}

impl<T: Float> FeatureMaps<T> {
    pub fn new() -> Self {
        FeatureMaps { entries: Vec::new() }
    }

    /// Record `tensor` under `key`. An existing key keeps its position and
    /// the previous tensor is returned.
    pub fn insert(&mut self, key: impl Into<String>, tensor: Tensor<T>) -> Option<Tensor<T>> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, tensor)),
            None => {
                self.entries.push((key, tensor));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Tensor<T>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor<T>)> {
        self.entries.iter().map(|(k, t)| (k.as_str(), t))
    }

    /// Every map reduced to its channel mean for sample `batch_index`, in
    /// recording order.
    pub fn layer_data(&self, batch_index: usize) -> TensorResult<Vec<(String, LayerData)>> {
        self.entries
            .iter()
            .map(|(k, t)| Ok((k.clone(), LayerData::from_activation(t, batch_index)?)))
            .collect()
    }
}

impl<T: Float> Default for FeatureMaps<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Float> IntoIterator for FeatureMaps<T> {
    type Item = (String, Tensor<T>);
    type IntoIter = std::vec::IntoIter<(String, Tensor<T>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// Shapes only; the activations themselves are far too large to print.
impl<T: Float> fmt::Debug for FeatureMaps<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, t)| (k, t.shape().to_string())))
            .finish()
    }
}
