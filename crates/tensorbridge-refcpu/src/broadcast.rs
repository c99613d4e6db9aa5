//! Broadcasting for elementwise operations.
//!
//! Shapes are aligned from the right. A pair of dimensions is compatible
//! when they are equal or one of them is 1; a missing leading dimension
//! counts as 1.

use crate::dense::{Dense, numel};
use crate::status::{NativeError, NativeResult};

/// Broadcast result shape, or `None` if the shapes are incompatible.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = dim_from_right(a, i);
        let db = dim_from_right(b, i);
        out[rank - 1 - i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

fn dim_from_right(shape: &[usize], i: usize) -> usize {
    if i < shape.len() {
        shape[shape.len() - 1 - i]
    } else {
        1
    }
}

/// For each element of `out_shape`, the offset of the element of a tensor
/// of shape `src` that broadcasts onto it.
fn source_offsets(src: &[usize], out_shape: &[usize]) -> Vec<usize> {
    let rank = out_shape.len();
    let lead = rank - src.len();

    // Row-major strides of `src`, aligned to `out_shape`; broadcast dims get 0.
    let mut strides = vec![0usize; rank];
    let mut acc = 1;
    for d in (0..src.len()).rev() {
        if src[d] != 1 {
            strides[lead + d] = acc;
        }
        acc *= src[d];
    }

    let total = numel(out_shape);
    let mut offsets = Vec::with_capacity(total);
    let mut index = vec![0usize; rank];
    for _ in 0..total {
        offsets.push(index.iter().zip(&strides).map(|(i, s)| i * s).sum());
        for d in (0..rank).rev() {
            index[d] += 1;
            if index[d] < out_shape[d] {
                break;
            }
            index[d] = 0;
        }
    }
    offsets
}

/// Elementwise `f(a, b)` under broadcasting.
pub fn broadcast_binary(
    op: &str,
    a: &Dense,
    b: &Dense,
    f: impl Fn(f64, f64) -> f64,
) -> NativeResult<Dense> {
    let shape = broadcast_shape(a.shape(), b.shape()).ok_or_else(|| {
        NativeError::ShapeMismatch(format!(
            "{op}: shapes {:?} and {:?} cannot be broadcast together",
            a.shape(),
            b.shape()
        ))
    })?;
    if a.shape() == b.shape() {
        return a.zip_map(b, f);
    }
    let oa = source_offsets(a.shape(), &shape);
    let ob = source_offsets(b.shape(), &shape);
    let data = oa
        .iter()
        .zip(&ob)
        .map(|(&i, &j)| f(a.data()[i], b.data()[j]))
        .collect();
    Dense::from_vec(data, &shape)
}

/// Sum a broadcast gradient back down to `shape`.
pub fn reduce_to_shape(grad: &Dense, shape: &[usize]) -> NativeResult<Dense> {
    if grad.shape() == shape {
        return Ok(grad.clone());
    }
    let mut out = Dense::zeros(shape);
    let offsets = source_offsets(shape, grad.shape());
    let target = out.data_mut();
    for (&o, &g) in offsets.iter().zip(grad.data()) {
        target[o] += g;
    }
    Ok(out)
}
