use crate::error::{TensorError, TensorResult};
use serde::{Deserialize, Serialize};

/// Dimensions of a tensor, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    pub fn from_slice(dims: &[usize]) -> Self {
        Shape {
            dims: dims.to_vec(),
        }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Size along a specific axis.
    pub fn dim(&self, axis: usize) -> TensorResult<usize> {
        self.dims.get(axis).copied().ok_or(TensorError::InvalidAxis {
            axis,
            ndim: self.ndim(),
        })
    }

    /// Total number of elements. A rank-0 shape holds one element.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.dims.clone()
    }

    /// Split a rank-4 shape into `(batch, channels, height, width)`.
    pub fn nchw(&self) -> TensorResult<(usize, usize, usize, usize)> {
        match self.dims.as_slice() {
            &[n, c, h, w] => Ok((n, c, h, w)),
            _ => Err(TensorError::DimensionMismatch(format!(
                "expected a [batch, channels, height, width] tensor, got shape {}",
                self
            ))),
        }
    }

    /// Row-major (C-order) strides.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1usize; self.dims.len()];
        for i in (0..self.dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Result shape of broadcasting `a` against `b` (NumPy rules).
    pub fn broadcast_shape(a: &Shape, b: &Shape) -> TensorResult<Shape> {
        let ndim = a.ndim().max(b.ndim());
        let padded = |s: &Shape, i: usize| {
            let offset = ndim - s.ndim();
            if i < offset { 1 } else { s.dims[i - offset] }
        };

        let mut result = Vec::with_capacity(ndim);
        for i in 0..ndim {
            let (da, db) = (padded(a, i), padded(b, i));
            let d = match (da, db) {
                _ if da == db => da,
                (1, _) => db,
                (_, 1) => da,
                _ => {
                    return Err(TensorError::BroadcastError {
                        a: a.to_vec(),
                        b: b.to_vec(),
                    })
                }
            };
            result.push(d);
        }
        Ok(Shape::new(result))
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::from_slice(dims)
    }
}
