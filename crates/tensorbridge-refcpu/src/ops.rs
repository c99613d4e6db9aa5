//! Tracked tensor operations and their backward functions.

use std::sync::Arc;

use crate::autograd::{GradFn, TensorNode, TensorRef};
use crate::broadcast::{broadcast_binary, reduce_to_shape};
use crate::dense::Dense;
use crate::status::NativeResult;

#[derive(Debug)]
struct AddBackward {
    lhs_shape: Vec<usize>,
    rhs_shape: Vec<usize>,
}

impl GradFn for AddBackward {
    fn name(&self) -> &'static str {
        "AddBackward"
    }

    fn backward(&self, grad_output: &Dense) -> NativeResult<Vec<Dense>> {
        Ok(vec![
            reduce_to_shape(grad_output, &self.lhs_shape)?,
            reduce_to_shape(grad_output, &self.rhs_shape)?,
        ])
    }
}

#[derive(Debug)]
struct SubBackward {
    lhs_shape: Vec<usize>,
    rhs_shape: Vec<usize>,
}

impl GradFn for SubBackward {
    fn name(&self) -> &'static str {
        "SubBackward"
    }

    fn backward(&self, grad_output: &Dense) -> NativeResult<Vec<Dense>> {
        Ok(vec![
            reduce_to_shape(grad_output, &self.lhs_shape)?,
            reduce_to_shape(&grad_output.map(|g| -g), &self.rhs_shape)?,
        ])
    }
}

/// Saves both operands from the forward pass.
#[derive(Debug)]
struct MulBackward {
    lhs: Dense,
    rhs: Dense,
}

impl GradFn for MulBackward {
    fn name(&self) -> &'static str {
        "MulBackward"
    }

    fn backward(&self, grad_output: &Dense) -> NativeResult<Vec<Dense>> {
        let grad_lhs = broadcast_binary("mul", grad_output, &self.rhs, |g, b| g * b)?;
        let grad_rhs = broadcast_binary("mul", grad_output, &self.lhs, |g, a| g * a)?;
        Ok(vec![
            reduce_to_shape(&grad_lhs, self.lhs.shape())?,
            reduce_to_shape(&grad_rhs, self.rhs.shape())?,
        ])
    }
}

#[derive(Debug)]
struct MatMulBackward {
    lhs: Dense,
    rhs: Dense,
}

impl GradFn for MatMulBackward {
    fn name(&self) -> &'static str {
        "MatMulBackward"
    }

    // dA = dC Bᵀ, dB = Aᵀ dC
    fn backward(&self, grad_output: &Dense) -> NativeResult<Vec<Dense>> {
        Ok(vec![
            grad_output.matmul(&self.rhs.transpose()?)?,
            self.lhs.transpose()?.matmul(grad_output)?,
        ])
    }
}

#[derive(Debug)]
struct TransposeBackward;

impl GradFn for TransposeBackward {
    fn name(&self) -> &'static str {
        "TransposeBackward"
    }

    fn backward(&self, grad_output: &Dense) -> NativeResult<Vec<Dense>> {
        Ok(vec![grad_output.transpose()?])
    }
}

#[derive(Debug)]
struct ReluBackward {
    input: Dense,
}

impl GradFn for ReluBackward {
    fn name(&self) -> &'static str {
        "ReluBackward"
    }

    fn backward(&self, grad_output: &Dense) -> NativeResult<Vec<Dense>> {
        let grad = grad_output.zip_map(&self.input, |g, x| if x > 0.0 { g } else { 0.0 })?;
        Ok(vec![grad])
    }
}

/// Saves the forward output: dσ/dx = σ(1 - σ).
#[derive(Debug)]
struct SigmoidBackward {
    output: Dense,
}

impl GradFn for SigmoidBackward {
    fn name(&self) -> &'static str {
        "SigmoidBackward"
    }

    fn backward(&self, grad_output: &Dense) -> NativeResult<Vec<Dense>> {
        let grad = grad_output.zip_map(&self.output, |g, y| g * y * (1.0 - y))?;
        Ok(vec![grad])
    }
}

#[derive(Debug)]
struct SumBackward {
    input_shape: Vec<usize>,
    scale: f64,
}

impl GradFn for SumBackward {
    fn name(&self) -> &'static str {
        "SumBackward"
    }

    fn backward(&self, grad_output: &Dense) -> NativeResult<Vec<Dense>> {
        let g = grad_output.sum() * self.scale;
        Ok(vec![Dense::full(&self.input_shape, g)])
    }
}

fn binary(
    op: &str,
    a: &TensorRef,
    b: &TensorRef,
    f: impl Fn(f64, f64) -> f64,
    grad_fn: impl FnOnce(Dense, Dense) -> Box<dyn GradFn>,
) -> NativeResult<TensorRef> {
    let (av, bv) = (a.snapshot(), b.snapshot());
    let value = broadcast_binary(op, &av, &bv, f)?;
    Ok(TensorNode::from_op(
        value,
        grad_fn(av, bv),
        vec![Arc::clone(a), Arc::clone(b)],
    ))
}

pub fn add(a: &TensorRef, b: &TensorRef) -> NativeResult<TensorRef> {
    binary("add", a, b, |x, y| x + y, |av, bv| {
        Box::new(AddBackward {
            lhs_shape: av.shape().to_vec(),
            rhs_shape: bv.shape().to_vec(),
        })
    })
}

pub fn sub(a: &TensorRef, b: &TensorRef) -> NativeResult<TensorRef> {
    binary("sub", a, b, |x, y| x - y, |av, bv| {
        Box::new(SubBackward {
            lhs_shape: av.shape().to_vec(),
            rhs_shape: bv.shape().to_vec(),
        })
    })
}

pub fn mul(a: &TensorRef, b: &TensorRef) -> NativeResult<TensorRef> {
    binary("mul", a, b, |x, y| x * y, |lhs, rhs| {
        Box::new(MulBackward { lhs, rhs })
    })
}

pub fn matmul(a: &TensorRef, b: &TensorRef) -> NativeResult<TensorRef> {
    let (lhs, rhs) = (a.snapshot(), b.snapshot());
    let value = lhs.matmul(&rhs)?;
    Ok(TensorNode::from_op(
        value,
        Box::new(MatMulBackward { lhs, rhs }),
        vec![Arc::clone(a), Arc::clone(b)],
    ))
}

pub fn transpose(a: &TensorRef) -> NativeResult<TensorRef> {
    let value = a.snapshot().transpose()?;
    Ok(TensorNode::from_op(
        value,
        Box::new(TransposeBackward),
        vec![Arc::clone(a)],
    ))
}

pub fn relu(a: &TensorRef) -> NativeResult<TensorRef> {
    let input = a.snapshot();
    let value = input.map(|x| x.max(0.0));
    Ok(TensorNode::from_op(
        value,
        Box::new(ReluBackward { input }),
        vec![Arc::clone(a)],
    ))
}

pub fn sigmoid(a: &TensorRef) -> NativeResult<TensorRef> {
    let output = a.snapshot().map(|x| 1.0 / (1.0 + (-x).exp()));
    Ok(TensorNode::from_op(
        output.clone(),
        Box::new(SigmoidBackward { output }),
        vec![Arc::clone(a)],
    ))
}

pub fn sum(a: &TensorRef) -> NativeResult<TensorRef> {
    let input = a.snapshot();
    Ok(TensorNode::from_op(
        Dense::scalar(input.sum()),
        Box::new(SumBackward {
            input_shape: input.shape().to_vec(),
            scale: 1.0,
        }),
        vec![Arc::clone(a)],
    ))
}

/// Mean over all elements; NaN for an empty tensor.
pub fn mean(a: &TensorRef) -> NativeResult<TensorRef> {
    let input = a.snapshot();
    let n = input.len() as f64;
    Ok(TensorNode::from_op(
        Dense::scalar(input.sum() / n),
        Box::new(SumBackward {
            input_shape: input.shape().to_vec(),
            scale: 1.0 / n,
        }),
        vec![Arc::clone(a)],
    ))
}
