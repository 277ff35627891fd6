use crate::dtype::Float;
use crate::error::{TensorError, TensorResult};
use crate::shape::Shape;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

/// N-dimensional tensor, the value type flowing between layers.
///
/// Stores data in a flat contiguous `Vec<T>` with row-major (C-order) layout.
/// Every operation returns a new tensor; nothing is modified in place unless
/// the method name says so (`*_mut`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct Tensor<T: Float> {
    data: Vec<T>,
    shape: Shape,
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

// ─── Construction ───────────────────────────────────────────────────────────

impl<T: Float> Tensor<T> {
    /// Create a tensor from raw data and shape.
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> TensorResult<Self> {
        let s = Shape::new(shape);
        if data.len() != s.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: s.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape: s })
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, T::ZERO)
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: Vec<usize>) -> Self {
        Self::full(shape, T::ONE)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(shape: Vec<usize>, value: T) -> Self {
        let s = Shape::new(shape);
        Tensor {
            data: vec![value; s.numel()],
            shape: s,
        }
    }

    /// Create a 1-D tensor from a slice.
    pub fn from_slice(data: &[T]) -> Self {
        Tensor {
            data: data.to_vec(),
            shape: Shape::new(vec![data.len()]),
        }
    }

    /// Uniform samples in `[low, high)` drawn from a caller-owned generator.
    pub fn uniform_with<R: Rng>(shape: Vec<usize>, low: f64, high: f64, rng: &mut R) -> Self {
        let s = Shape::new(shape);
        let span = high - low;
        let data: Vec<T> = (0..s.numel())
            .map(|_| T::from_f64(low + span * rng.gen::<f64>()))
            .collect();
        Tensor { data, shape: s }
    }

    /// Random tensor with uniform distribution in [0, 1).
    pub fn rand(shape: Vec<usize>, seed: Option<u64>) -> Self {
        Self::uniform_with(shape, 0.0, 1.0, &mut seeded_rng(seed))
    }

    /// Random tensor with standard normal distribution (Box-Muller).
    pub fn randn(shape: Vec<usize>, seed: Option<u64>) -> Self {
        let s = Shape::new(shape);
        let mut rng = seeded_rng(seed);
        let n = s.numel();
        let mut data = Vec::with_capacity(n + 1);

        while data.len() < n {
            let u1: f64 = rng.gen::<f64>().max(1e-10);
            let u2: f64 = rng.gen::<f64>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f64::consts::PI * u2;
            data.push(T::from_f64(r * theta.cos()));
            data.push(T::from_f64(r * theta.sin()));
        }
        data.truncate(n);
        Tensor { data, shape: s }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn shape_vec(&self) -> Vec<usize> {
        self.shape.to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    fn offset(&self, indices: &[usize]) -> TensorResult<usize> {
        if indices.len() != self.ndim() {
            return Err(TensorError::DimensionMismatch(format!(
                "Expected {} indices, got {}",
                self.ndim(),
                indices.len()
            )));
        }
        let strides = self.shape.strides();
        let mut offset = 0;
        for (axis, (&idx, &size)) in indices.iter().zip(self.shape.dims()).enumerate() {
            if idx >= size {
                return Err(TensorError::IndexOutOfBounds { index: idx, axis, size });
            }
            offset += idx * strides[axis];
        }
        Ok(offset)
    }

    /// Read one element by multi-dimensional index.
    pub fn get(&self, indices: &[usize]) -> TensorResult<T> {
        Ok(self.data[self.offset(indices)?])
    }

    /// Overwrite one element by multi-dimensional index.
    pub fn set(&mut self, indices: &[usize], value: T) -> TensorResult<()> {
        let offset = self.offset(indices)?;
        self.data[offset] = value;
        Ok(())
    }

    // ─── Shape Manipulation ─────────────────────────────────────────────────

    /// Reshape the tensor (data remains the same, only shape changes).
    pub fn reshape(&self, new_shape: Vec<usize>) -> TensorResult<Tensor<T>> {
        let ns = Shape::new(new_shape);
        if self.numel() != ns.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: ns.to_vec(),
                got: self.shape_vec(),
            });
        }
        Ok(Tensor {
            data: self.data.clone(),
            shape: ns,
        })
    }

    // ─── Element-wise Unary Operations ──────────────────────────────────────

    pub fn apply<F: Fn(T) -> T>(&self, f: F) -> Tensor<T> {
        Tensor {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
        }
    }

    /// ReLU activation: max(0, x).
    pub fn relu(&self) -> Tensor<T> {
        self.apply(|x| x.max(T::ZERO))
    }

    pub fn add_scalar(&self, s: T) -> Tensor<T> { self.apply(|x| x + s) }
    pub fn mul_scalar(&self, s: T) -> Tensor<T> { self.apply(|x| x * s) }

    // ─── Element-wise Binary Operations (with broadcasting) ─────────────────

    fn broadcast_binary_op<F: Fn(T, T) -> T>(
        &self,
        other: &Tensor<T>,
        op: F,
    ) -> TensorResult<Tensor<T>> {
        if self.shape == other.shape {
            let data: Vec<T> = self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| op(a, b))
                .collect();
            return Ok(Tensor {
                data,
                shape: self.shape.clone(),
            });
        }

        let out_shape = Shape::broadcast_shape(&self.shape, &other.shape)?;
        let ndim = out_shape.ndim();
        let out_strides = out_shape.strides();

        // Per output axis, the stride into each operand (0 where it broadcasts).
        let operand_strides = |t: &Tensor<T>| -> Vec<usize> {
            let offset = ndim - t.ndim();
            let strides = t.shape.strides();
            (0..ndim)
                .map(|d| {
                    if d < offset || t.shape.dims()[d - offset] == 1 {
                        0
                    } else {
                        strides[d - offset]
                    }
                })
                .collect()
        };
        let a_strides = operand_strides(self);
        let b_strides = operand_strides(other);

        let mut data = Vec::with_capacity(out_shape.numel());
        for flat_idx in 0..out_shape.numel() {
            let mut remaining = flat_idx;
            let (mut a_off, mut b_off) = (0usize, 0usize);
            for d in 0..ndim {
                let idx = remaining / out_strides[d];
                remaining %= out_strides[d];
                a_off += idx * a_strides[d];
                b_off += idx * b_strides[d];
            }
            data.push(op(self.data[a_off], other.data[b_off]));
        }

        Ok(Tensor {
            data,
            shape: out_shape,
        })
    }

    pub fn add(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.broadcast_binary_op(other, |a, b| a + b)
    }

    pub fn mul(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.broadcast_binary_op(other, |a, b| a * b)
    }

    // ─── Reduction Operations ───────────────────────────────────────────────

    /// Sum of all elements.
    pub fn sum_all(&self) -> T {
        self.data.iter().copied().sum()
    }

    /// Mean of all elements.
    pub fn mean_all(&self) -> T {
        if self.data.is_empty() {
            return T::ZERO;
        }
        self.sum_all() / T::from_usize(self.data.len())
    }

    pub fn max_all(&self) -> TensorResult<T> {
        self.data
            .iter()
            .copied()
            .reduce(T::max)
            .ok_or(TensorError::EmptyTensor)
    }

    pub fn min_all(&self) -> TensorResult<T> {
        self.data
            .iter()
            .copied()
            .reduce(T::min)
            .ok_or(TensorError::EmptyTensor)
    }

    /// Largest absolute element-wise difference against a same-shaped tensor.
    pub fn max_abs_diff(&self, other: &Tensor<T>) -> TensorResult<T> {
        if self.shape != other.shape {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape_vec(),
                got: other.shape_vec(),
            });
        }
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| (a - b).abs())
            .fold(T::ZERO, T::max))
    }

    /// True if every element is finite.
    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    // ─── Linear Algebra ─────────────────────────────────────────────────────

    /// Swap the two axes of a 2-D tensor.
    pub fn transpose(&self) -> TensorResult<Tensor<T>> {
        if self.ndim() != 2 {
            return Err(TensorError::InvalidOperation(format!(
                "transpose requires a 2-D tensor, got shape {}",
                self.shape
            )));
        }
        let (rows, cols) = (self.shape.dims()[0], self.shape.dims()[1]);
        let mut data = Vec::with_capacity(self.numel());
        for c in 0..cols {
            data.extend((0..rows).map(|r| self.data[r * cols + c]));
        }
        Tensor::new(data, vec![cols, rows])
    }

    /// 2-D matrix multiply: `[m, k] x [k, n] -> [m, n]`.
    pub fn matmul(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        if self.ndim() != 2 || other.ndim() != 2 {
            return Err(TensorError::InvalidOperation(
                "matmul requires two 2-D tensors".to_string(),
            ));
        }
        let (m, k) = (self.shape.dims()[0], self.shape.dims()[1]);
        let (k2, n) = (other.shape.dims()[0], other.shape.dims()[1]);
        if k != k2 {
            return Err(TensorError::DimensionMismatch(format!(
                "matmul: inner dimensions must match, got {} and {}",
                k, k2
            )));
        }

        // i-p-j order walks both operands row-wise.
        let mut data = vec![T::ZERO; m * n];
        for i in 0..m {
            let out_row = &mut data[i * n..(i + 1) * n];
            for p in 0..k {
                let a = self.data[i * k + p];
                let b_row = &other.data[p * n..(p + 1) * n];
                for (o, &b) in out_row.iter_mut().zip(b_row) {
                    *o += a * b;
                }
            }
        }
        Tensor::new(data, vec![m, n])
    }
}

impl<T: Float> PartialEq for Tensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

// ─── Display ────────────────────────────────────────────────────────────────

impl<T: Float> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ndim() == 2 {
            let (rows, cols) = (self.shape.dims()[0], self.shape.dims()[1]);
            writeln!(f, "tensor([")?;
            for i in 0..rows.min(8) {
                write!(f, "  [")?;
                for j in 0..cols.min(8) {
                    if j > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:.4}", self.data[i * cols + j])?;
                }
                if cols > 8 {
                    write!(f, ", ...")?;
                }
                writeln!(f, "],")?;
            }
            if rows > 8 {
                writeln!(f, "  ...")?;
            }
            return write!(f, "], shape={})", self.shape);
        }
        write!(f, "tensor(shape={}, numel={})", self.shape, self.numel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_creation() {
        let t: Tensor<f32> = Tensor::zeros(vec![2, 3, 4, 4]);
        assert_eq!(t.shape_vec(), vec![2, 3, 4, 4]);
        assert_eq!(t.numel(), 96);
        assert_eq!(t.sum_all(), 0.0);

        let t: Tensor<f64> = Tensor::ones(vec![2, 3]);
        assert_eq!(t.sum_all(), 6.0);

        assert!(Tensor::<f32>::new(vec![1.0, 2.0], vec![3]).is_err());
    }

    #[test]
    fn test_get_set() {
        let mut t: Tensor<f32> = Tensor::zeros(vec![1, 2, 2, 2]);
        t.set(&[0, 1, 0, 1], 5.0).unwrap();
        assert_eq!(t.get(&[0, 1, 0, 1]).unwrap(), 5.0);
        assert_eq!(t.data()[5], 5.0);
        assert!(matches!(
            t.get(&[0, 2, 0, 0]),
            Err(TensorError::IndexOutOfBounds { axis: 1, .. })
        ));
        assert!(t.get(&[0, 0]).is_err());
    }

    #[test]
    fn test_relu() {
        let t: Tensor<f32> = Tensor::from_slice(&[-2.0, -0.0, 0.5, 3.0]);
        assert_eq!(t.relu().data(), &[0.0, 0.0, 0.5, 3.0]);
    }

    #[test]
    fn test_broadcasting() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        let b: Tensor<f64> = Tensor::new(vec![10.0, 20.0, 30.0], vec![1, 3]).unwrap();
        let c = a.add(&b).unwrap();
        assert_eq!(c.shape_vec(), vec![2, 3]);
        assert_eq!(c.data(), &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);

        // per-channel scale over an NCHW tensor
        let x: Tensor<f64> = Tensor::ones(vec![1, 2, 2, 2]);
        let scale: Tensor<f64> = Tensor::new(vec![2.0, 3.0], vec![2, 1, 1]).unwrap();
        let y = x.mul(&scale).unwrap();
        assert_eq!(y.data(), &[2.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_add_shape_mismatch() {
        let a: Tensor<f32> = Tensor::zeros(vec![1, 64, 8, 8]);
        let b: Tensor<f32> = Tensor::zeros(vec![1, 128, 4, 4]);
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn test_matmul() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        let b: Tensor<f64> =
            Tensor::new(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0], vec![3, 2]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape_vec(), vec![2, 2]);
        assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);

        assert!(a.matmul(&a).is_err());
    }

    #[test]
    fn test_transpose() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        let t = a.transpose().unwrap();
        assert_eq!(t.shape_vec(), vec![3, 2]);
        assert_eq!(t.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(t.transpose().unwrap(), a);
        assert!(Tensor::<f64>::zeros(vec![2, 2, 2]).transpose().is_err());
    }

    #[test]
    fn test_reshape() {
        let a: Tensor<f32> = Tensor::rand(vec![2, 8, 1, 1], Some(3));
        let b = a.reshape(vec![2, 8]).unwrap();
        assert_eq!(b.shape_vec(), vec![2, 8]);
        assert_eq!(b.data(), a.data());
        assert!(a.reshape(vec![3, 5]).is_err());
    }

    #[test]
    fn test_rand_seeded() {
        let t: Tensor<f64> = Tensor::rand(vec![100], Some(42));
        assert!(t.min_all().unwrap() >= 0.0);
        assert!(t.max_all().unwrap() < 1.0);
        assert_eq!(t, Tensor::rand(vec![100], Some(42)));
    }

    #[test]
    fn test_randn_moments() {
        let t: Tensor<f64> = Tensor::randn(vec![20_001], Some(7));
        assert_eq!(t.numel(), 20_001);
        assert_abs_diff_eq!(t.mean_all(), 0.0, epsilon = 0.05);
        let var = t.apply(|x| x * x).mean_all();
        assert_abs_diff_eq!(var, 1.0, epsilon = 0.05);
    }

    #[test]
    fn test_uniform_with_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let t: Tensor<f32> = Tensor::uniform_with(vec![64, 9], -0.5, 0.5, &mut rng);
        assert!(t.min_all().unwrap() >= -0.5);
        assert!(t.max_all().unwrap() < 0.5);
    }

    #[test]
    fn test_max_abs_diff() {
        let a: Tensor<f32> = Tensor::from_slice(&[1.0, 2.0, 3.0]);
        let b: Tensor<f32> = Tensor::from_slice(&[1.0, 2.5, 2.0]);
        assert_eq!(a.max_abs_diff(&b).unwrap(), 1.0);
        assert!(a.max_abs_diff(&Tensor::zeros(vec![2])).is_err());
    }
}
