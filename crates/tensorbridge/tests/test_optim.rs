//! Integration tests for optimizers.

mod common;

use approx::assert_relative_eq;
use common::{bridge, destroy_all};
use tensorbridge::{AdamConfig, BridgeError, OptimizerKind, ResourceKind, SgdConfig, Tensor};

#[test]
fn test_adam_empty_params_is_configuration_error() {
    let b = bridge();
    let none: [&Tensor; 0] = [];
    assert!(matches!(
        b.adam(none, AdamConfig::default()),
        Err(BridgeError::Configuration(_))
    ));
    assert!(matches!(
        b.sgd(Vec::<&Tensor>::new(), SgdConfig::default()),
        Err(BridgeError::Configuration(_))
    ));
}

#[test]
fn test_invalid_hyperparameters_are_rejected() {
    let b = bridge();
    let mut w = b.ones(&[2]).unwrap();
    w.set_requires_grad(true).unwrap();

    assert!(matches!(
        b.adam([&w], AdamConfig::new(-1.0)),
        Err(BridgeError::Configuration(_))
    ));
    assert!(matches!(
        b.adam([&w], AdamConfig::default().with_betas(1.5, 0.9)),
        Err(BridgeError::Configuration(_))
    ));
    assert!(matches!(
        b.sgd([&w], SgdConfig::new(0.1).with_momentum(-0.5)),
        Err(BridgeError::Configuration(_))
    ));
    w.destroy().unwrap();
}

#[test]
fn test_released_param_is_rejected() {
    let b = bridge();
    let mut w = b.ones(&[2]).unwrap();
    w.destroy().unwrap();
    assert!(matches!(
        b.adam([&w], AdamConfig::default()),
        Err(BridgeError::UseAfterRelease { kind: ResourceKind::Tensor })
    ));
}

#[test]
fn test_adam_step_changes_values() {
    let b = bridge();
    let mut w = b.from_array(&[1.0, -2.0, 3.0], None).unwrap();
    w.set_requires_grad(true).unwrap();
    let mut opt = b.adam([&w], AdamConfig::new(0.1)).unwrap();
    assert_eq!(opt.kind(), OptimizerKind::Adam);
    assert_eq!(opt.num_parameters(), 1);
    assert_relative_eq!(opt.learning_rate(), 0.1);

    let mut sq = w.multiply(&w).unwrap();
    let mut loss = sq.sum().unwrap();
    loss.backward().unwrap();
    opt.step().unwrap();

    // First Adam step moves each element by lr against the gradient sign.
    let values = w.to_array().unwrap();
    assert_relative_eq!(values[0], 0.9, epsilon = 1e-6);
    assert_relative_eq!(values[1], -1.9, epsilon = 1e-6);
    assert_relative_eq!(values[2], 2.9, epsilon = 1e-6);
    assert_eq!(w.shape().dims(), &[3]);

    opt.destroy().unwrap();
    destroy_all([&mut w, &mut sq, &mut loss]);
}

#[test]
fn test_step_without_gradients_is_noop() {
    let b = bridge();
    let mut w = b.ones(&[2]).unwrap();
    w.set_requires_grad(true).unwrap();
    let mut opt = b.adam([&w], AdamConfig::default()).unwrap();
    opt.step().unwrap();
    assert_eq!(w.to_array().unwrap(), vec![1.0, 1.0]);
    opt.destroy().unwrap();
    w.destroy().unwrap();
}

#[test]
fn test_sgd_descends_quadratic() {
    let b = bridge();
    let mut w = b.from_array(&[4.0, -4.0], None).unwrap();
    w.set_requires_grad(true).unwrap();
    let mut opt = b.sgd([&w], SgdConfig::new(0.1)).unwrap();
    assert_eq!(opt.kind(), OptimizerKind::Sgd);

    let mut last = f64::INFINITY;
    for _ in 0..20 {
        opt.zero_grad().unwrap();
        let mut sq = w.multiply(&w).unwrap();
        let mut loss = sq.sum().unwrap();
        let value = loss.item().unwrap();
        assert!(value < last);
        last = value;
        loss.backward().unwrap();
        opt.step().unwrap();
        destroy_all([&mut sq, &mut loss]);
    }
    // w <- 0.8 w per step
    let expected = 4.0 * 0.8f64.powi(20);
    let values = w.to_array().unwrap();
    assert_relative_eq!(values[0], expected, epsilon = 1e-9);
    assert_relative_eq!(values[1], -expected, epsilon = 1e-9);

    opt.destroy().unwrap();
    w.destroy().unwrap();
}

#[test]
fn test_optimizer_destroy_twice() {
    let b = bridge();
    let mut w = b.ones(&[1]).unwrap();
    let mut opt = b.adam([&w], AdamConfig::default()).unwrap();
    opt.destroy().unwrap();
    assert!(opt.is_released());
    assert!(matches!(
        opt.step(),
        Err(BridgeError::UseAfterRelease { kind: ResourceKind::Optimizer })
    ));
    assert!(matches!(
        opt.destroy(),
        Err(BridgeError::UseAfterRelease { kind: ResourceKind::Optimizer })
    ));
    w.destroy().unwrap();
}
