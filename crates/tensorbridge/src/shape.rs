//! Cached tensor shapes and the compatibility rules checked before dispatch.

use std::fmt;
use std::ops::Deref;

use smallvec::SmallVec;

use crate::error::{BridgeError, Result};

/// Ordered tensor dimensions as reported by the native library.
///
/// Uses `SmallVec<[i64; 4]>` so the common rank ≤ 4 case stays inline.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: SmallVec<[i64; 4]>,
}

impl Shape {
    /// Shape of a rank-0 tensor.
    pub fn scalar() -> Self {
        Self::default()
    }

    /// Validate host-supplied dimensions for a constructor.
    ///
    /// Negative dimensions and element counts that do not fit in `usize`
    /// are `Configuration` errors.
    pub fn checked(dims: &[i64]) -> Result<Self> {
        let shape = Self::non_negative(dims)?;
        if shape.checked_numel().is_none() {
            return Err(BridgeError::config(format!(
                "shape {dims:?} has more elements than fit in memory"
            )));
        }
        Ok(shape)
    }

    /// Reject negative dimensions only.
    pub(crate) fn non_negative(dims: &[i64]) -> Result<Self> {
        if let Some(&d) = dims.iter().find(|&&d| d < 0) {
            return Err(BridgeError::config(format!(
                "shape {dims:?} has negative dimension {d}"
            )));
        }
        Ok(Self::from(dims))
    }

    #[inline]
    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements (1 for a scalar), saturating at `usize::MAX`.
    pub fn numel(&self) -> usize {
        self.checked_numel().unwrap_or(usize::MAX)
    }

    /// Number of elements, or `None` if the product overflows `usize`.
    pub fn checked_numel(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| {
            usize::try_from(d.max(0)).ok().and_then(|d| acc.checked_mul(d))
        })
    }

    /// Size of the last dimension, if any.
    pub fn last(&self) -> Option<i64> {
        self.dims.last().copied()
    }

    pub fn to_vec(&self) -> Vec<i64> {
        self.dims.to_vec()
    }
}

impl Deref for Shape {
    type Target = [i64];

    fn deref(&self) -> &[i64] {
        &self.dims
    }
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Self {
            dims: SmallVec::from_vec(dims),
        }
    }
}

impl From<&[i64]> for Shape {
    fn from(dims: &[i64]) -> Self {
        Self {
            dims: dims.iter().copied().collect(),
        }
    }
}

impl PartialEq<[i64]> for Shape {
    fn eq(&self, other: &[i64]) -> bool {
        self.dims.as_slice() == other
    }
}

impl<const N: usize> PartialEq<[i64; N]> for Shape {
    fn eq(&self, other: &[i64; N]) -> bool {
        self.dims.as_slice() == other.as_slice()
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.dims.iter()).finish()
    }
}

/// Result shape of an elementwise operation under broadcasting.
///
/// Dimensions are aligned from the right; each pair must be equal or one of
/// them must be 1.
pub fn broadcast_shapes(op: &'static str, lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    let rank = lhs.rank().max(rhs.rank());
    let mut out = vec![0i64; rank];
    for i in 0..rank {
        let l = dim_from_right(lhs, i);
        let r = dim_from_right(rhs, i);
        out[rank - 1 - i] = match (l, r) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => {
                return Err(BridgeError::ShapeMismatch {
                    op,
                    lhs: lhs.to_vec(),
                    rhs: rhs.to_vec(),
                });
            }
        };
    }
    Ok(Shape::from(out))
}

fn dim_from_right(shape: &Shape, i: usize) -> i64 {
    if i < shape.rank() {
        shape[shape.rank() - 1 - i]
    } else {
        1
    }
}

/// Result shape of a rank-2 matrix product.
pub fn matmul_shape(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    for shape in [lhs, rhs] {
        if shape.rank() != 2 {
            return Err(BridgeError::UnsupportedRank {
                op: "matmul",
                rank: shape.rank(),
            });
        }
    }
    if lhs[1] != rhs[0] {
        return Err(BridgeError::ShapeMismatch {
            op: "matmul",
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        });
    }
    Ok(Shape::from(vec![lhs[0], rhs[1]]))
}

/// Result shape of a transpose; rank 0 and 1 are returned unchanged.
pub fn transpose_shape(shape: &Shape) -> Result<Shape> {
    match shape.rank() {
        0 | 1 => Ok(shape.clone()),
        2 => Ok(Shape::from(vec![shape[1], shape[0]])),
        rank => Err(BridgeError::UnsupportedRank {
            op: "transpose",
            rank,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(dims: &[i64]) -> Shape {
        Shape::from(dims)
    }

    #[test]
    fn test_checked_rejects_negative() {
        assert!(Shape::checked(&[2, 3]).is_ok());
        assert!(Shape::checked(&[]).is_ok());
        let err = Shape::checked(&[2, -1]).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn test_checked_rejects_overflowing_product() {
        let huge = [1i64 << 33, 1 << 33];
        assert!(matches!(
            Shape::checked(&huge),
            Err(BridgeError::Configuration(_))
        ));
        assert!(Shape::non_negative(&huge).is_ok());
        assert_eq!(s(&huge).checked_numel(), None);
        assert_eq!(s(&huge).numel(), usize::MAX);
    }

    #[test]
    fn test_numel() {
        assert_eq!(s(&[2, 3, 4]).numel(), 24);
        assert_eq!(Shape::scalar().numel(), 1);
        assert_eq!(s(&[0, 5]).numel(), 0);
        assert_eq!(s(&[2, 3, 4]).checked_numel(), Some(24));
    }

    #[test]
    fn test_broadcast_equal() {
        assert_eq!(broadcast_shapes("add", &s(&[2, 3]), &s(&[2, 3])).unwrap(), [2, 3]);
    }

    #[test]
    fn test_broadcast_row_vector() {
        assert_eq!(broadcast_shapes("add", &s(&[4, 3]), &s(&[3])).unwrap(), [4, 3]);
        assert_eq!(broadcast_shapes("add", &s(&[4, 1]), &s(&[1, 5])).unwrap(), [4, 5]);
        assert_eq!(broadcast_shapes("add", &Shape::scalar(), &s(&[2, 2])).unwrap(), [2, 2]);
    }

    #[test]
    fn test_broadcast_mismatch() {
        let err = broadcast_shapes("multiply", &s(&[2, 3]), &s(&[3, 2])).unwrap_err();
        match err {
            BridgeError::ShapeMismatch { op, lhs, rhs } => {
                assert_eq!(op, "multiply");
                assert_eq!(lhs, vec![2, 3]);
                assert_eq!(rhs, vec![3, 2]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_matmul_shape() {
        assert_eq!(matmul_shape(&s(&[2, 3]), &s(&[3, 4])).unwrap(), [2, 4]);
        assert!(matches!(
            matmul_shape(&s(&[2, 3]), &s(&[4, 4])),
            Err(BridgeError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            matmul_shape(&s(&[2, 2, 2]), &s(&[2, 2])),
            Err(BridgeError::UnsupportedRank { rank: 3, .. })
        ));
    }

    #[test]
    fn test_transpose_shape() {
        assert_eq!(transpose_shape(&s(&[2, 5])).unwrap(), [5, 2]);
        assert_eq!(transpose_shape(&s(&[7])).unwrap(), [7]);
        assert!(transpose_shape(&s(&[1, 2, 3])).is_err());
    }
}
