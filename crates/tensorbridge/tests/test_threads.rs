//! Integration tests for sharing the bridge across threads.

mod common;

use std::thread;

use common::{bridge, destroy_all};
use tensorbridge::{Bridge, Linear, Optimizer, SgdConfig, Tensor};

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn test_wrappers_are_send_and_sync() {
    assert_send_sync::<Bridge>();
    assert_send_sync::<Tensor>();
    assert_send_sync::<Linear>();
    assert_send_sync::<Optimizer>();
}

#[test]
fn test_concurrent_chains() {
    let b = bridge();
    thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(move || {
                    for _ in 0..50 {
                        let mut a = b.ones(&[2, 2]).unwrap();
                        let mut c = a.matmul(&a).unwrap();
                        assert_eq!(c.to_array().unwrap(), vec![2.0; 4]);
                        destroy_all([&mut a, &mut c]);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    });
}

#[test]
fn test_concurrent_training_steps() {
    let b = bridge();
    thread::scope(|s| {
        for start in [1.0, -2.0, 3.0, -4.0] {
            s.spawn(move || {
                let mut w = b.from_array(&[start], None).unwrap();
                w.set_requires_grad(true).unwrap();
                let mut opt = b.sgd([&w], SgdConfig::new(0.25)).unwrap();
                for _ in 0..4 {
                    opt.zero_grad().unwrap();
                    let mut sq = w.multiply(&w).unwrap();
                    let mut loss = sq.sum().unwrap();
                    loss.backward().unwrap();
                    opt.step().unwrap();
                    destroy_all([&mut sq, &mut loss]);
                }
                // w <- 0.5 w per step, independent of the other threads.
                assert_eq!(w.to_array().unwrap(), vec![start / 16.0]);
                opt.destroy().unwrap();
                w.destroy().unwrap();
            });
        }
    });
}

#[test]
fn test_tensor_moves_between_threads() {
    let b = bridge();
    let mut x = b.from_array(&[1.0, 2.0, 3.0], None).unwrap();
    let mut total = thread::spawn(move || {
        let s = x.sum().unwrap();
        x.destroy().unwrap();
        s
    })
    .join()
    .unwrap();
    assert_eq!(total.item().unwrap(), 6.0);
    total.destroy().unwrap();
}
