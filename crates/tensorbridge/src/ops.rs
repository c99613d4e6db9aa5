//! Operation dispatcher.
//!
//! Every function here is pure from the caller's point of view: operands are
//! borrowed, stay valid, and the result wraps a brand-new native handle.
//! Shape compatibility is checked against the cached shapes before the call
//! crosses into the native library.

use crate::error::Result;
use crate::native::{BinaryFn, CallSite, NativeApi, UnaryFn};
use crate::shape::{broadcast_shapes, matmul_shape, transpose_shape};
use crate::tensor::{Tensor, same_library};

fn dispatch_binary(
    op: &'static str,
    select: fn(&NativeApi) -> BinaryFn,
    a: &Tensor,
    b: &Tensor,
) -> Result<Tensor> {
    let (ra, rb) = (a.raw()?, b.raw()?);
    same_library(op, a.api(), b.api())?;
    let api = a.api();
    let f = select(api);
    let raw = api.call_ctor(CallSite::with_shapes(op, a.shape(), b.shape()), |status| unsafe {
        f(ra, rb, status)
    })?;
    Tensor::from_raw(api, raw)
}

fn dispatch_unary(
    op: &'static str,
    select: fn(&NativeApi) -> UnaryFn,
    a: &Tensor,
) -> Result<Tensor> {
    let ra = a.raw()?;
    let api = a.api();
    let f = select(api);
    let raw = api.call_ctor(CallSite::with_shapes(op, a.shape(), &[]), |status| unsafe {
        f(ra, status)
    })?;
    Tensor::from_raw(api, raw)
}

/// Elementwise sum with broadcasting.
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    a.raw()?;
    b.raw()?;
    broadcast_shapes("add", a.shape(), b.shape())?;
    dispatch_binary("add", |api| api.tensor_add, a, b)
}

/// Elementwise difference with broadcasting.
pub fn subtract(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    a.raw()?;
    b.raw()?;
    broadcast_shapes("subtract", a.shape(), b.shape())?;
    dispatch_binary("subtract", |api| api.tensor_sub, a, b)
}

/// Elementwise product with broadcasting.
pub fn multiply(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    a.raw()?;
    b.raw()?;
    broadcast_shapes("multiply", a.shape(), b.shape())?;
    dispatch_binary("multiply", |api| api.tensor_mul, a, b)
}

/// Matrix product of two rank-2 tensors.
///
/// Batched (rank ≥ 3) operands are rejected with `UnsupportedRank`.
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    a.raw()?;
    b.raw()?;
    matmul_shape(a.shape(), b.shape())?;
    dispatch_binary("matmul", |api| api.tensor_matmul, a, b)
}

/// Swap the two axes of a rank-2 tensor; rank 0 and 1 come back unchanged.
pub fn transpose(a: &Tensor) -> Result<Tensor> {
    a.raw()?;
    transpose_shape(a.shape())?;
    dispatch_unary("transpose", |api| api.tensor_transpose, a)
}

pub fn relu(a: &Tensor) -> Result<Tensor> {
    dispatch_unary("relu", |api| api.tensor_relu, a)
}

pub fn sigmoid(a: &Tensor) -> Result<Tensor> {
    dispatch_unary("sigmoid", |api| api.tensor_sigmoid, a)
}

/// Sum of all elements as a rank-0 tensor.
pub fn sum(a: &Tensor) -> Result<Tensor> {
    dispatch_unary("sum", |api| api.tensor_sum, a)
}

/// Mean of all elements as a rank-0 tensor.
pub fn mean(a: &Tensor) -> Result<Tensor> {
    dispatch_unary("mean", |api| api.tensor_mean, a)
}

impl Tensor {
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        add(self, other)
    }

    pub fn subtract(&self, other: &Tensor) -> Result<Tensor> {
        subtract(self, other)
    }

    pub fn multiply(&self, other: &Tensor) -> Result<Tensor> {
        multiply(self, other)
    }

    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        matmul(self, other)
    }

    pub fn transpose(&self) -> Result<Tensor> {
        transpose(self)
    }

    pub fn relu(&self) -> Result<Tensor> {
        relu(self)
    }

    pub fn sigmoid(&self) -> Result<Tensor> {
        sigmoid(self)
    }

    pub fn sum(&self) -> Result<Tensor> {
        sum(self)
    }

    pub fn mean(&self) -> Result<Tensor> {
        mean(self)
    }
}
