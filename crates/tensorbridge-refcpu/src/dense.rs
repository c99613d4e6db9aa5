//! Row-major dense `f64` buffers.

use faer::linalg::matmul::matmul;
use faer::{Accum, MatMut, MatRef, Par};

use crate::status::{NativeError, NativeResult};

/// Dense row-major buffer with its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    data: Vec<f64>,
    shape: Vec<usize>,
}

/// Element count of a shape. Shapes reaching this point have passed
/// `checked_numel` at the boundary, so the product saturates rather than wraps.
pub fn numel(shape: &[usize]) -> usize {
    checked_numel(shape).unwrap_or(usize::MAX)
}

pub fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

impl Dense {
    pub fn full(shape: &[usize], value: f64) -> Self {
        Self {
            data: vec![value; numel(shape)],
            shape: shape.to_vec(),
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            data: vec![value],
            shape: Vec::new(),
        }
    }

    pub fn from_vec(data: Vec<f64>, shape: &[usize]) -> NativeResult<Self> {
        let expected = numel(shape);
        if data.len() != expected {
            return Err(NativeError::ShapeMismatch(format!(
                "{} values cannot fill shape {shape:?} ({expected} elements)",
                data.len()
            )));
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
        })
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
        }
    }

    /// Same-shape elementwise combination.
    pub fn zip_map(&self, other: &Dense, f: impl Fn(f64, f64) -> f64) -> NativeResult<Self> {
        if self.shape != other.shape {
            return Err(NativeError::ShapeMismatch(format!(
                "{:?} vs {:?}",
                self.shape, other.shape
            )));
        }
        Ok(Self {
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
            shape: self.shape.clone(),
        })
    }

    pub fn add_assign(&mut self, other: &Dense) -> NativeResult<()> {
        if self.shape != other.shape {
            return Err(NativeError::ShapeMismatch(format!(
                "cannot accumulate {:?} into {:?}",
                other.shape, self.shape
            )));
        }
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
        Ok(())
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Reinterpret the same data under a new shape with equal element count.
    pub fn reshape(mut self, shape: &[usize]) -> NativeResult<Self> {
        if numel(shape) != self.data.len() {
            return Err(NativeError::ShapeMismatch(format!(
                "cannot reshape {:?} to {shape:?}",
                self.shape
            )));
        }
        self.shape = shape.to_vec();
        Ok(self)
    }

    /// Swap the axes of a matrix; rank 0 and 1 are copied unchanged.
    pub fn transpose(&self) -> NativeResult<Self> {
        match *self.shape.as_slice() {
            [] | [_] => Ok(self.clone()),
            [rows, cols] => {
                let mut data = Vec::with_capacity(self.data.len());
                for j in 0..cols {
                    for i in 0..rows {
                        data.push(self.data[i * cols + j]);
                    }
                }
                Ok(Self {
                    data,
                    shape: vec![cols, rows],
                })
            }
            _ => Err(NativeError::UnsupportedRank(format!(
                "transpose expects rank <= 2, got {:?}",
                self.shape
            ))),
        }
    }

    /// Matrix product of two rank-2 buffers using faer.
    ///
    /// faer is column-major, and a row-major `m x k` buffer read as
    /// column-major is its `k x m` transpose, so `Cᵀ = Bᵀ Aᵀ` is computed
    /// directly on the row-major data.
    pub fn matmul(&self, other: &Dense) -> NativeResult<Self> {
        let (m, k, k2, n) = match (self.shape.as_slice(), other.shape.as_slice()) {
            (&[m, k], &[k2, n]) => (m, k, k2, n),
            _ => {
                return Err(NativeError::UnsupportedRank(format!(
                    "matmul expects rank-2 operands, got {:?} and {:?}",
                    self.shape, other.shape
                )));
            }
        };
        if k != k2 {
            return Err(NativeError::ShapeMismatch(format!(
                "matmul inner dimensions differ: {:?} and {:?}",
                self.shape, other.shape
            )));
        }

        let mut out = vec![0.0; m * n];
        if m > 0 && n > 0 && k > 0 {
            let a_t = MatRef::from_column_major_slice(&self.data, k, m);
            let b_t = MatRef::from_column_major_slice(&other.data, n, k);
            let mut c_t = MatMut::from_column_major_slice_mut(&mut out, n, m);
            matmul(c_t.as_mut(), Accum::Replace, b_t, a_t, 1.0, Par::Seq);
        }
        Ok(Self {
            data: out,
            shape: vec![m, n],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_checked_numel_overflow() {
        assert_eq!(checked_numel(&[]), Some(1));
        assert_eq!(checked_numel(&[2, 3, 4]), Some(24));
        assert_eq!(checked_numel(&[1 << 33, 1 << 33]), None);
        assert_eq!(numel(&[1 << 33, 1 << 33]), usize::MAX);
    }

    #[test]
    fn test_from_vec_checks_length() {
        assert!(Dense::from_vec(vec![1.0, 2.0], &[3]).is_err());
        let t = Dense::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.len(), 6);
    }

    #[test]
    fn test_scalar_shape() {
        let s = Dense::scalar(4.0);
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.data(), &[4.0]);
        assert_eq!(Dense::zeros(&[]).len(), 1);
    }

    #[test]
    fn test_matmul_row_major() {
        // [[1, 2, 3], [4, 5, 6]] @ [[7, 8], [9, 10], [11, 12]]
        let a = Dense::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let b = Dense::from_vec(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0], &[3, 2]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        let expected = [58.0, 64.0, 139.0, 154.0];
        for (x, y) in c.data().iter().zip(expected.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_matmul_errors() {
        let a = Dense::zeros(&[2, 3]);
        let b = Dense::zeros(&[2, 3]);
        assert!(matches!(a.matmul(&b), Err(NativeError::ShapeMismatch(_))));
        let c = Dense::zeros(&[2, 2, 2]);
        assert!(matches!(c.matmul(&a), Err(NativeError::UnsupportedRank(_))));
    }

    #[test]
    fn test_transpose() {
        let a = Dense::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let t = a.transpose().unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(t.transpose().unwrap(), a);
    }

    #[test]
    fn test_add_assign() {
        let mut a = Dense::full(&[3], 1.0);
        a.add_assign(&Dense::full(&[3], 2.0)).unwrap();
        assert_eq!(a.data(), &[3.0, 3.0, 3.0]);
        assert!(a.add_assign(&Dense::zeros(&[2])).is_err());
    }
}
