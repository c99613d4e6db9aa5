//! Optimizers driving in-place parameter updates.

use std::fmt;

use log::debug;

use crate::bridge::Bridge;
use crate::config::{AdamConfig, SgdConfig};
use crate::error::{BridgeError, ResourceKind, Result};
use crate::handle::OwnedHandle;
use crate::native::{CallSite, NativeApi, RawHandle, StatusCode};
use crate::tensor::{Tensor, same_library};

/// Update rule implemented by the native optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Adam => f.write_str("adam"),
            OptimizerKind::Sgd => f.write_str("sgd"),
        }
    }
}

/// Native optimizer over a fixed, ordered set of parameters.
///
/// The optimizer owns only its native state. Parameters are referenced, not
/// owned: the caller keeps every parameter tensor alive for as long as the
/// optimizer may `step()` or `zero_grad()`, and destroying the optimizer
/// never releases a parameter.
///
/// Gradients are not cleared automatically. Call [`Optimizer::zero_grad`]
/// once per iteration before `backward()`, otherwise they accumulate.
#[derive(Debug)]
pub struct Optimizer {
    handle: OwnedHandle,
    api: &'static NativeApi,
    kind: OptimizerKind,
    learning_rate: f64,
    num_parameters: usize,
}

/// Collect live parameter handles, all from the bridge's library.
fn collect_params<'a>(
    bridge: Bridge,
    params: impl IntoIterator<Item = &'a Tensor>,
) -> Result<Vec<RawHandle>> {
    let mut raws = Vec::new();
    for param in params {
        let raw = param.raw()?;
        same_library("optimizer", bridge.api(), param.api())?;
        raws.push(raw);
    }
    if raws.is_empty() {
        return Err(BridgeError::config(
            "optimizer needs at least one parameter",
        ));
    }
    Ok(raws)
}

impl Optimizer {
    /// Adam over `params`.
    ///
    /// # Errors
    ///
    /// `Configuration` for an empty parameter list or invalid
    /// hyper-parameters, `UseAfterRelease` if a parameter was destroyed.
    pub fn adam<'a>(
        bridge: Bridge,
        params: impl IntoIterator<Item = &'a Tensor>,
        config: AdamConfig,
    ) -> Result<Self> {
        config.validate()?;
        let raws = collect_params(bridge, params)?;
        let api = bridge.api();
        let (beta1, beta2) = config.betas;
        let raw = api.call_ctor(CallSite::new("adam"), |status| unsafe {
            (api.optimizer_adam)(
                raws.as_ptr(),
                raws.len(),
                config.learning_rate,
                beta1,
                beta2,
                config.eps,
                config.weight_decay,
                status,
            )
        })?;
        Ok(Self::wrap(api, raw, OptimizerKind::Adam, config.learning_rate, raws.len()))
    }

    /// Stochastic gradient descent over `params`.
    pub fn sgd<'a>(
        bridge: Bridge,
        params: impl IntoIterator<Item = &'a Tensor>,
        config: SgdConfig,
    ) -> Result<Self> {
        config.validate()?;
        let raws = collect_params(bridge, params)?;
        let api = bridge.api();
        let raw = api.call_ctor(CallSite::new("sgd"), |status| unsafe {
            (api.optimizer_sgd)(
                raws.as_ptr(),
                raws.len(),
                config.learning_rate,
                config.momentum,
                config.weight_decay,
                status,
            )
        })?;
        Ok(Self::wrap(api, raw, OptimizerKind::Sgd, config.learning_rate, raws.len()))
    }

    fn wrap(
        api: &'static NativeApi,
        raw: RawHandle,
        kind: OptimizerKind,
        learning_rate: f64,
        num_parameters: usize,
    ) -> Self {
        debug!("created {kind} optimizer over {num_parameters} parameters");
        Self {
            handle: OwnedHandle::new(raw, ResourceKind::Optimizer, api.optimizer_release),
            api,
            kind,
            learning_rate,
            num_parameters,
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn num_parameters(&self) -> usize {
        self.num_parameters
    }

    /// Apply one update to every parameter in place.
    ///
    /// Parameter shapes never change across a step, so cached shapes stay
    /// valid.
    pub fn step(&mut self) -> Result<()> {
        let raw = self.handle.get()?;
        debug!("{} step over {} parameters", self.kind, self.num_parameters);
        let code: StatusCode = unsafe { (self.api.optimizer_step)(raw) };
        self.api.check(code, CallSite::new("step"))
    }

    /// Clear the accumulated gradients of every parameter.
    pub fn zero_grad(&mut self) -> Result<()> {
        let raw = self.handle.get()?;
        let code: StatusCode = unsafe { (self.api.optimizer_zero_grad)(raw) };
        self.api.check(code, CallSite::new("zero_grad"))
    }

    /// Release the optimizer state. Parameters are left untouched.
    pub fn destroy(&mut self) -> Result<()> {
        self.handle.release()
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }
}
