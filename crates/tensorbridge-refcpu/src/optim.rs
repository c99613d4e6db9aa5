//! Native optimizers updating parameter values in place.

use crate::autograd::TensorRef;
use crate::dense::Dense;
use crate::status::{NativeError, NativeResult};

/// Hyperparameters of Adam.
#[derive(Debug, Clone, Copy)]
pub struct AdamParams {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

/// Hyperparameters of SGD.
#[derive(Debug, Clone, Copy)]
pub struct SgdParams {
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
}

/// Optimizer over a fixed list of parameters, with its per-parameter state.
#[derive(Debug)]
pub enum OptimizerState {
    Adam {
        params: Vec<TensorRef>,
        hyper: AdamParams,
        m: Vec<Dense>,
        v: Vec<Dense>,
        t: i32,
    },
    Sgd {
        params: Vec<TensorRef>,
        hyper: SgdParams,
        velocity: Vec<Option<Dense>>,
    },
}

fn check_params(params: &[TensorRef], lr: f64) -> NativeResult<()> {
    if params.is_empty() {
        return Err(NativeError::InvalidArgument(
            "optimizer got an empty parameter list".to_string(),
        ));
    }
    if !(lr.is_finite() && lr > 0.0) {
        return Err(NativeError::InvalidArgument(format!(
            "learning rate must be positive, got {lr}"
        )));
    }
    Ok(())
}

/// Gradient of `param` with weight decay folded in, if it has one.
fn decayed_grad(param: &TensorRef, weight_decay: f64) -> NativeResult<Option<Dense>> {
    let Some(grad) = param.grad() else {
        return Ok(None);
    };
    let g = grad.snapshot();
    if weight_decay == 0.0 {
        return Ok(Some(g));
    }
    let p = param.snapshot();
    g.zip_map(&p, |g, p| g + weight_decay * p).map(Some)
}

impl OptimizerState {
    pub fn adam(params: Vec<TensorRef>, hyper: AdamParams) -> NativeResult<Self> {
        check_params(&params, hyper.lr)?;
        let m: Vec<Dense> = params.iter().map(|p| Dense::zeros(&p.shape())).collect();
        let v = m.clone();
        Ok(OptimizerState::Adam {
            params,
            hyper,
            m,
            v,
            t: 0,
        })
    }

    pub fn sgd(params: Vec<TensorRef>, hyper: SgdParams) -> NativeResult<Self> {
        check_params(&params, hyper.lr)?;
        let velocity = vec![None; params.len()];
        Ok(OptimizerState::Sgd {
            params,
            hyper,
            velocity,
        })
    }

    pub fn params(&self) -> &[TensorRef] {
        match self {
            OptimizerState::Adam { params, .. } | OptimizerState::Sgd { params, .. } => params,
        }
    }

    /// One update. Parameters without a gradient are left untouched.
    pub fn step(&mut self) -> NativeResult<()> {
        match self {
            OptimizerState::Adam {
                params,
                hyper,
                m,
                v,
                t,
            } => {
                *t += 1;
                let bias1 = 1.0 - hyper.beta1.powi(*t);
                let bias2 = 1.0 - hyper.beta2.powi(*t);
                for ((param, m), v) in params.iter().zip(m.iter_mut()).zip(v.iter_mut()) {
                    let Some(g) = decayed_grad(param, hyper.weight_decay)? else {
                        continue;
                    };
                    *m = m.zip_map(&g, |m, g| hyper.beta1 * m + (1.0 - hyper.beta1) * g)?;
                    *v = v.zip_map(&g, |v, g| hyper.beta2 * v + (1.0 - hyper.beta2) * g * g)?;
                    let update = m.zip_map(v, |m, v| {
                        hyper.lr * (m / bias1) / ((v / bias2).sqrt() + hyper.eps)
                    })?;
                    let mut value = param.value();
                    for (x, u) in value.data_mut().iter_mut().zip(update.data()) {
                        *x -= u;
                    }
                }
            }
            OptimizerState::Sgd {
                params,
                hyper,
                velocity,
            } => {
                for (param, buf) in params.iter().zip(velocity.iter_mut()) {
                    let Some(g) = decayed_grad(param, hyper.weight_decay)? else {
                        continue;
                    };
                    let direction = if hyper.momentum == 0.0 {
                        g
                    } else {
                        let next = match buf.take() {
                            Some(prev) => prev.zip_map(&g, |b, g| hyper.momentum * b + g)?,
                            None => g,
                        };
                        *buf = Some(next.clone());
                        next
                    };
                    let mut value = param.value();
                    for (x, d) in value.data_mut().iter_mut().zip(direction.data()) {
                        *x -= hyper.lr * d;
                    }
                }
            }
        }
        Ok(())
    }

    /// Clear the gradient of every parameter.
    pub fn zero_grad(&self) {
        for param in self.params() {
            param.zero_grad();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{TensorNode, backward};
    use crate::ops::{mul, sum};
    use approx::assert_relative_eq;

    const ADAM: AdamParams = AdamParams {
        lr: 0.1,
        beta1: 0.9,
        beta2: 0.999,
        eps: 1e-8,
        weight_decay: 0.0,
    };

    fn with_grad(values: Vec<f64>) -> TensorRef {
        let n = values.len();
        let p = TensorNode::parameter(Dense::from_vec(values, &[n]).unwrap());
        backward(&sum(&mul(&p, &p).unwrap()).unwrap()).unwrap();
        p
    }

    #[test]
    fn test_empty_params_rejected() {
        assert!(OptimizerState::adam(vec![], ADAM).is_err());
        let sgd = SgdParams {
            lr: 0.1,
            momentum: 0.0,
            weight_decay: 0.0,
        };
        assert!(OptimizerState::sgd(vec![], sgd).is_err());
    }

    #[test]
    fn test_adam_first_step_moves_by_lr() {
        // With bias correction the first step is lr * sign(g).
        let p = with_grad(vec![1.0, -2.0]);
        let mut opt = OptimizerState::adam(vec![p.clone()], ADAM).unwrap();
        opt.step().unwrap();
        let data = p.snapshot();
        assert_relative_eq!(data.data()[0], 0.9, epsilon = 1e-6);
        assert_relative_eq!(data.data()[1], -1.9, epsilon = 1e-6);
    }

    #[test]
    fn test_sgd_step_and_momentum() {
        let p = with_grad(vec![1.0]);
        let hyper = SgdParams {
            lr: 0.1,
            momentum: 0.5,
            weight_decay: 0.0,
        };
        let mut opt = OptimizerState::sgd(vec![p.clone()], hyper).unwrap();
        // grad = 2.0, p = 1 - 0.2
        opt.step().unwrap();
        assert_relative_eq!(p.snapshot().data()[0], 0.8, epsilon = 1e-12);
        // Same stored grad, buf = 0.5 * 2 + 2 = 3, p = 0.8 - 0.3
        opt.step().unwrap();
        assert_relative_eq!(p.snapshot().data()[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_step_skips_params_without_grad() {
        let p = TensorNode::parameter(Dense::full(&[2], 3.0));
        let mut opt = OptimizerState::adam(vec![p.clone()], ADAM).unwrap();
        opt.step().unwrap();
        assert_eq!(p.snapshot().data(), &[3.0, 3.0]);
    }

    #[test]
    fn test_zero_grad_clears() {
        let p = with_grad(vec![1.0, 2.0]);
        let opt = OptimizerState::adam(vec![p.clone()], ADAM).unwrap();
        assert!(p.grad().is_some());
        opt.zero_grad();
        assert!(p.grad().is_none());
    }
}
