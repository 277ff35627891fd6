use rand::Rng;
use rayon::prelude::*;
use spectral_resnet_core::{Float, Tensor, TensorError, TensorResult};

use super::layers::Layer;

/// Output size of a sliding window along one axis, or an error when the
/// padded input is smaller than the window.
fn window_out_dim(input: usize, kernel: usize, stride: usize, padding: usize) -> TensorResult<usize> {
    if stride == 0 {
        return Err(TensorError::InvalidOperation("stride must be positive".to_string()));
    }
    if input + 2 * padding < kernel {
        return Err(TensorError::InvalidOperation(format!(
            "window {} does not fit padded input {}",
            kernel,
            input + 2 * padding
        )));
    }
    Ok((input + 2 * padding - kernel) / stride + 1)
}

/// 2D Convolution layer.
///
/// Input shape:  [batch, in_channels, height, width]
/// Output shape: [batch, out_channels, out_h, out_w]
/// where out_h = (height + 2*padding - kernel_size) / stride + 1
pub struct Conv2D<T: Float> {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub weight: Tensor<T>,       // [out_channels, in_channels, kH, kW]
    pub bias: Option<Tensor<T>>, // [out_channels]
}

impl<T: Float> Conv2D<T> {
    /// Weights (and bias, when requested) drawn from U(-1/√fan_in, 1/√fan_in).
    pub fn new<R: Rng>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        bias: bool,
        rng: &mut R,
    ) -> Self {
        let fan_in = (in_channels * kernel_size * kernel_size).max(1);
        let bound = 1.0 / (fan_in as f64).sqrt();
        let weight = Tensor::uniform_with(
            vec![out_channels, in_channels, kernel_size, kernel_size],
            -bound,
            bound,
            rng,
        );
        let bias = bias.then(|| Tensor::uniform_with(vec![out_channels], -bound, bound, rng));

        Conv2D {
            in_channels, out_channels, kernel_size, stride, padding,
            weight,
            bias,
        }
    }

    /// Spatial output size for an `h x w` input.
    pub fn output_hw(&self, h: usize, w: usize) -> TensorResult<(usize, usize)> {
        Ok((
            window_out_dim(h, self.kernel_size, self.stride, self.padding)?,
            window_out_dim(w, self.kernel_size, self.stride, self.padding)?,
        ))
    }

    /// Unroll one image `[in_channels, h, w]` into `[in_channels*k*k, out_h*out_w]`.
    fn im2col(&self, image: &[T], h: usize, w: usize, out_h: usize, out_w: usize) -> Vec<T> {
        let k = self.kernel_size;
        let plane = out_h * out_w;
        let pad = self.padding as isize;
        let mut cols = vec![T::ZERO; self.in_channels * k * k * plane];

        for ic in 0..self.in_channels {
            let channel = &image[ic * h * w..(ic + 1) * h * w];
            for kh in 0..k {
                for kw in 0..k {
                    let row = (ic * k + kh) * k + kw;
                    let dst = &mut cols[row * plane..(row + 1) * plane];
                    for oh in 0..out_h {
                        let ih = (oh * self.stride + kh) as isize - pad;
                        if ih < 0 || ih >= h as isize {
                            continue;
                        }
                        let src = &channel[ih as usize * w..(ih as usize + 1) * w];
                        for ow in 0..out_w {
                            let iw = (ow * self.stride + kw) as isize - pad;
                            if iw >= 0 && iw < w as isize {
                                dst[oh * out_w + ow] = src[iw as usize];
                            }
                        }
                    }
                }
            }
        }
        cols
    }
}

impl<T: Float> Layer<T> for Conv2D<T> {
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let (batch, in_ch, h, w) = input.shape().nchw()?;
        if in_ch != self.in_channels {
            return Err(TensorError::ChannelMismatch {
                layer: "Conv2D",
                expected: self.in_channels,
                got: in_ch,
            });
        }
        let (out_h, out_w) = self.output_hw(h, w)?;
        let plane = out_h * out_w;
        let patch = self.in_channels * self.kernel_size * self.kernel_size;
        let image_len = in_ch * h * w;
        let x = input.data();

        let columns: Vec<Vec<T>> = (0..batch)
            .into_par_iter()
            .map(|b| self.im2col(&x[b * image_len..(b + 1) * image_len], h, w, out_h, out_w))
            .collect();

        let weight = self.weight.data();
        let bias = self.bias.as_ref().map(|b| b.data());
        let mut output = vec![T::ZERO; batch * self.out_channels * plane];

        // One output plane per (batch, out_channel) pair.
        output
            .par_chunks_mut(plane.max(1))
            .enumerate()
            .for_each(|(idx, out_plane)| {
                let (b, oc) = (idx / self.out_channels, idx % self.out_channels);
                if let Some(bias) = bias {
                    out_plane.fill(bias[oc]);
                }
                let cols = &columns[b];
                for (p, &wv) in weight[oc * patch..(oc + 1) * patch].iter().enumerate() {
                    let col = &cols[p * plane..(p + 1) * plane];
                    for (o, &c) in out_plane.iter_mut().zip(col) {
                        *o += wv * c;
                    }
                }
            });

        Tensor::new(output, vec![batch, self.out_channels, out_h, out_w])
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor<T>)> {
        let mut params = vec![("weight".to_string(), &self.weight)];
        if let Some(b) = &self.bias {
            params.push(("bias".to_string(), b));
        }
        params
    }
}

/// Max Pooling 2D. Padded positions never win the max.
pub struct MaxPool2D {
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl MaxPool2D {
    pub fn new(kernel_size: usize, stride: usize, padding: usize) -> Self {
        MaxPool2D { kernel_size, stride, padding }
    }
}

impl<T: Float> Layer<T> for MaxPool2D {
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let (batch, channels, h, w) = input.shape().nchw()?;
        if self.padding * 2 > self.kernel_size {
            return Err(TensorError::InvalidOperation(format!(
                "MaxPool2D padding {} exceeds half the kernel size {}",
                self.padding, self.kernel_size
            )));
        }
        let out_h = window_out_dim(h, self.kernel_size, self.stride, self.padding)?;
        let out_w = window_out_dim(w, self.kernel_size, self.stride, self.padding)?;
        let plane = out_h * out_w;
        let pad = self.padding as isize;
        let x = input.data();

        let mut output = vec![T::NEG_INFINITY; batch * channels * plane];
        output
            .par_chunks_mut(plane.max(1))
            .enumerate()
            .for_each(|(idx, out_plane)| {
                let src = &x[idx * h * w..(idx + 1) * h * w];
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let mut max_val = T::NEG_INFINITY;
                        for kh in 0..self.kernel_size {
                            let ih = (oh * self.stride + kh) as isize - pad;
                            if ih < 0 || ih >= h as isize {
                                continue;
                            }
                            for kw in 0..self.kernel_size {
                                let iw = (ow * self.stride + kw) as isize - pad;
                                if iw < 0 || iw >= w as isize {
                                    continue;
                                }
                                let val = src[ih as usize * w + iw as usize];
                                if val > max_val { max_val = val; }
                            }
                        }
                        out_plane[oh * out_w + ow] = max_val;
                    }
                }
            });

        Tensor::new(output, vec![batch, channels, out_h, out_w])
    }
}

/// Average pooling to a fixed output grid, whatever the input size.
///
/// Cell `i` of an axis of length `n` pooled to `m` covers
/// `floor(i*n/m) .. ceil((i+1)*n/m)`.
pub struct AdaptiveAvgPool2D {
    pub output_size: (usize, usize),
}

impl AdaptiveAvgPool2D {
    pub fn new(output_size: (usize, usize)) -> Self {
        AdaptiveAvgPool2D { output_size }
    }

    /// Global average pooling, one value per channel.
    pub fn global() -> Self {
        Self::new((1, 1))
    }

    fn bounds(i: usize, input: usize, output: usize) -> (usize, usize) {
        let start = i * input / output;
        let end = ((i + 1) * input).div_ceil(output);
        (start, end)
    }
}

impl<T: Float> Layer<T> for AdaptiveAvgPool2D {
    fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let (batch, channels, h, w) = input.shape().nchw()?;
        let (out_h, out_w) = self.output_size;
        if h == 0 || w == 0 || out_h == 0 || out_w == 0 {
            return Err(TensorError::EmptyTensor);
        }
        let plane = out_h * out_w;
        let x = input.data();

        let mut output = vec![T::ZERO; batch * channels * plane];
        output
            .par_chunks_mut(plane)
            .enumerate()
            .for_each(|(idx, out_plane)| {
                let src = &x[idx * h * w..(idx + 1) * h * w];
                for oh in 0..out_h {
                    let (h0, h1) = Self::bounds(oh, h, out_h);
                    for ow in 0..out_w {
                        let (w0, w1) = Self::bounds(ow, w, out_w);
                        let mut sum = T::ZERO;
                        for ih in h0..h1 {
                            for &v in &src[ih * w + w0..ih * w + w1] {
                                sum += v;
                            }
                        }
                        out_plane[oh * out_w + ow] = sum / T::from_usize((h1 - h0) * (w1 - w0));
                    }
                }
            });

        Tensor::new(output, vec![batch, channels, out_h, out_w])
    }
}
