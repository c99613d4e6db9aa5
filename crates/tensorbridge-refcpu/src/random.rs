//! Process-wide random number generator.
//!
//! Seeded from the OS on first use unless [`manual_seed`] ran before.

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::dense::{Dense, numel};

static RNG: Mutex<Option<StdRng>> = Mutex::new(None);

/// Reset the generator to a reproducible state.
pub fn manual_seed(seed: u64) {
    let mut guard = RNG.lock().unwrap_or_else(PoisonError::into_inner);
    *guard = Some(StdRng::seed_from_u64(seed));
}

/// Run `f` with exclusive access to the generator.
pub fn with_rng<R>(f: impl FnOnce(&mut StdRng) -> R) -> R {
    let mut guard = RNG.lock().unwrap_or_else(PoisonError::into_inner);
    let rng = guard.get_or_insert_with(|| StdRng::from_rng(&mut rand::rng()));
    f(rng)
}

/// Standard normal samples from the shared generator.
pub fn randn(shape: &[usize]) -> Dense {
    with_rng(|rng| randn_with_rng(shape, rng))
}

/// Standard normal samples from a specific generator.
pub fn randn_with_rng<R: Rng>(shape: &[usize], rng: &mut R) -> Dense {
    let data: Vec<f64> = (0..numel(shape))
        .map(|_| rng.sample::<f64, _>(StandardNormal))
        .collect();
    Dense::from_vec(data, shape).unwrap_or_else(|_| Dense::zeros(shape))
}

/// Uniform samples in `[-bound, bound)` from the shared generator.
pub fn uniform(shape: &[usize], bound: f64) -> Dense {
    with_rng(|rng| uniform_with_rng(shape, bound, rng))
}

pub fn uniform_with_rng<R: Rng>(shape: &[usize], bound: f64, rng: &mut R) -> Dense {
    let data: Vec<f64> = (0..numel(shape))
        .map(|_| rng.random_range(-bound..bound))
        .collect();
    Dense::from_vec(data, shape).unwrap_or_else(|_| Dense::zeros(shape))
}
