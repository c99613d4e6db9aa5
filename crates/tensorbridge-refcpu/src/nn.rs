//! Native modules.

use std::sync::Arc;

use crate::autograd::{GradFn, TensorNode, TensorRef};
use crate::dense::Dense;
use crate::random::uniform;
use crate::status::{NativeError, NativeResult};

/// Fully connected layer owning its weight `[out, in]` and bias `[out]`.
#[derive(Debug)]
pub struct LinearModule {
    weight: TensorRef,
    bias: TensorRef,
    in_features: usize,
    out_features: usize,
}

/// Saves the input and weight values seen by the forward pass.
#[derive(Debug)]
struct LinearBackward {
    input: Dense,
    weight: Dense,
    input_shape: Vec<usize>,
}

impl GradFn for LinearBackward {
    fn name(&self) -> &'static str {
        "LinearBackward"
    }

    // y = x Wᵀ + b  ⇒  dx = dy W, dW = dyᵀ x, db = Σ_rows dy
    fn backward(&self, grad_output: &Dense) -> NativeResult<Vec<Dense>> {
        let rows = self.input.shape()[0];
        let out = self.weight.shape()[0];
        let dy = grad_output.clone().reshape(&[rows, out])?;

        let dx = dy.matmul(&self.weight)?.reshape(&self.input_shape)?;
        let dw = dy.transpose()?.matmul(&self.input)?;
        let mut db = Dense::zeros(&[out]);
        for row in dy.data().chunks(out.max(1)) {
            for (acc, &g) in db.data_mut().iter_mut().zip(row) {
                *acc += g;
            }
        }
        Ok(vec![dx, dw, db])
    }
}

impl LinearModule {
    /// Weights and bias are drawn uniformly from `±1/sqrt(in_features)`.
    pub fn new(in_features: usize, out_features: usize) -> NativeResult<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(NativeError::InvalidArgument(format!(
                "linear layer needs positive feature counts, got {in_features} -> {out_features}"
            )));
        }
        if in_features.checked_mul(out_features).is_none() {
            return Err(NativeError::InvalidArgument(format!(
                "linear layer {in_features} -> {out_features} has too many weights"
            )));
        }
        let bound = 1.0 / (in_features as f64).sqrt();
        Ok(Self {
            weight: TensorNode::parameter(uniform(&[out_features, in_features], bound)),
            bias: TensorNode::parameter(uniform(&[out_features], bound)),
            in_features,
            out_features,
        })
    }

    pub fn parameters(&self) -> [TensorRef; 2] {
        [Arc::clone(&self.weight), Arc::clone(&self.bias)]
    }

    /// Apply to `[in]` or `[batch, in]` input.
    pub fn forward(&self, input: &TensorRef) -> NativeResult<TensorRef> {
        let x = input.snapshot();
        let input_shape = x.shape().to_vec();
        let rows = match *input_shape.as_slice() {
            [n] if n == self.in_features => 1,
            [rows, n] if n == self.in_features => rows,
            [_] | [_, _] => {
                return Err(NativeError::ShapeMismatch(format!(
                    "linear expects last dimension {}, got input {input_shape:?}",
                    self.in_features
                )));
            }
            _ => {
                return Err(NativeError::UnsupportedRank(format!(
                    "linear expects rank 1 or 2 input, got {input_shape:?}"
                )));
            }
        };

        let x2 = x.reshape(&[rows, self.in_features])?;
        let w = self.weight.snapshot();
        let b = self.bias.snapshot();

        let mut y = x2.matmul(&w.transpose()?)?;
        for row in y.data_mut().chunks_mut(self.out_features) {
            for (v, &bias) in row.iter_mut().zip(b.data()) {
                *v += bias;
            }
        }
        let out_shape: Vec<usize> = if input_shape.len() == 1 {
            vec![self.out_features]
        } else {
            vec![rows, self.out_features]
        };
        let y = y.reshape(&out_shape)?;

        Ok(TensorNode::from_op(
            y,
            Box::new(LinearBackward {
                input: x2,
                weight: w,
                input_shape,
            }),
            vec![
                Arc::clone(input),
                Arc::clone(&self.weight),
                Arc::clone(&self.bias),
            ],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use crate::ops::sum;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_zero_features() {
        assert!(LinearModule::new(0, 3).is_err());
        assert!(LinearModule::new(3, 0).is_err());
    }

    #[test]
    fn test_rejects_overflowing_weight_count() {
        assert!(matches!(
            LinearModule::new(1 << 33, 1 << 33),
            Err(NativeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_init_bounds() {
        let layer = LinearModule::new(4, 3).unwrap();
        let [w, b] = layer.parameters();
        assert_eq!(w.shape(), vec![3, 4]);
        assert_eq!(b.shape(), vec![3]);
        assert!(w.snapshot().data().iter().all(|x| x.abs() <= 0.5));
        assert!(w.requires_grad() && b.requires_grad());
    }

    #[test]
    fn test_forward_matches_manual() {
        let layer = LinearModule::new(3, 2).unwrap();
        let [w, b] = layer.parameters();
        let (wv, bv) = (w.snapshot(), b.snapshot());

        let x = TensorNode::leaf(Dense::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap());
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape(), vec![2]);

        let y = y.snapshot();
        for o in 0..2 {
            let expected: f64 = (0..3).map(|i| wv.data()[o * 3 + i] * x.snapshot().data()[i]).sum::<f64>()
                + bv.data()[o];
            assert_relative_eq!(y.data()[o], expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_forward_shape_errors() {
        let layer = LinearModule::new(3, 2).unwrap();
        let bad = TensorNode::leaf(Dense::zeros(&[2, 4]));
        assert!(matches!(layer.forward(&bad), Err(NativeError::ShapeMismatch(_))));
        let rank3 = TensorNode::leaf(Dense::zeros(&[1, 2, 3]));
        assert!(matches!(layer.forward(&rank3), Err(NativeError::UnsupportedRank(_))));
    }

    #[test]
    fn test_backward_batch() {
        let layer = LinearModule::new(2, 3).unwrap();
        let x = TensorNode::parameter(Dense::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap());
        let loss = sum(&layer.forward(&x).unwrap()).unwrap();
        backward(&loss).unwrap();

        let [w, b] = layer.parameters();
        // db = number of rows, dW[o] = column sums of x
        assert_eq!(b.grad().unwrap().snapshot().data(), &[2.0, 2.0, 2.0]);
        assert_eq!(
            w.grad().unwrap().snapshot().data(),
            &[4.0, 6.0, 4.0, 6.0, 4.0, 6.0]
        );
        // dx[r] = Σ_o W[o]
        let wv = w.snapshot();
        let col0: f64 = (0..3).map(|o| wv.data()[o * 2]).sum();
        assert_relative_eq!(x.grad().unwrap().snapshot().data()[0], col0, epsilon = 1e-12);
    }
}
