//! Shared helpers for integration tests.

#![allow(dead_code)]

use tensorbridge::{Bridge, Tensor};

/// Bridge over the reference CPU library, with test logging enabled.
pub fn bridge() -> Bridge {
    let _ = env_logger::builder().is_test(true).try_init();
    Bridge::new(tensorbridge_refcpu::api())
}

/// Destroy every tensor, panicking on the first failure.
pub fn destroy_all<'a>(tensors: impl IntoIterator<Item = &'a mut Tensor>) {
    for t in tensors {
        t.destroy().unwrap();
    }
}

/// Compute numerical gradient using central difference.
///
/// grad_i ≈ (f(x + eps*e_i) - f(x - eps*e_i)) / (2*eps)
pub fn numerical_gradient<F>(f: F, x: &[f64], eps: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut grad = vec![0.0; x.len()];
    let mut x_plus = x.to_vec();
    let mut x_minus = x.to_vec();

    for i in 0..x.len() {
        x_plus[i] = x[i] + eps;
        x_minus[i] = x[i] - eps;
        grad[i] = (f(&x_plus) - f(&x_minus)) / (2.0 * eps);
        x_plus[i] = x[i];
        x_minus[i] = x[i];
    }
    grad
}
