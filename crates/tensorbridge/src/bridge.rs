//! Entry point binding wrappers to one native library.

use std::fmt;

use crate::config::{AdamConfig, SgdConfig};
use crate::error::Result;
use crate::native::NativeApi;
use crate::nn::Linear;
use crate::optim::Optimizer;
use crate::tensor::Tensor;

/// Factory for tensors, layers and optimizers backed by one native library.
///
/// `Bridge` is a cheap copyable reference to the library's function table.
/// Every wrapper it creates remembers the table and refuses to mix with
/// wrappers from a different one.
#[derive(Clone, Copy)]
pub struct Bridge {
    api: &'static NativeApi,
}

impl Bridge {
    pub fn new(api: &'static NativeApi) -> Self {
        Self { api }
    }

    #[inline]
    pub fn api(&self) -> &'static NativeApi {
        self.api
    }

    /// Seed the native library's random number generator.
    pub fn manual_seed(&self, seed: u64) {
        unsafe { (self.api.manual_seed)(seed) }
    }

    pub fn zeros(&self, shape: &[i64]) -> Result<Tensor> {
        Tensor::zeros(*self, shape)
    }

    pub fn ones(&self, shape: &[i64]) -> Result<Tensor> {
        Tensor::ones(*self, shape)
    }

    pub fn randn(&self, shape: &[i64]) -> Result<Tensor> {
        Tensor::randn(*self, shape)
    }

    pub fn from_array(&self, values: &[f64], shape: Option<&[i64]>) -> Result<Tensor> {
        Tensor::from_array(*self, values, shape)
    }

    pub fn linear(&self, in_features: usize, out_features: usize) -> Result<Linear> {
        Linear::new(*self, in_features, out_features)
    }

    pub fn adam<'a>(
        &self,
        params: impl IntoIterator<Item = &'a Tensor>,
        config: AdamConfig,
    ) -> Result<Optimizer> {
        Optimizer::adam(*self, params, config)
    }

    pub fn sgd<'a>(
        &self,
        params: impl IntoIterator<Item = &'a Tensor>,
        config: SgdConfig,
    ) -> Result<Optimizer> {
        Optimizer::sgd(*self, params, config)
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("api", &(self.api as *const NativeApi))
            .finish()
    }
}
