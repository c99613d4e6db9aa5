//! Native layers.

use crate::bridge::Bridge;
use crate::error::{BridgeError, ResourceKind, Result};
use crate::handle::OwnedHandle;
use crate::native::{CallSite, NativeApi, RawHandle};
use crate::tensor::{Tensor, same_library};

/// Fully connected layer `y = x Wᵀ + b`.
///
/// The native module owns its weight `[out_features, in_features]` and bias
/// `[out_features]`. They are only exposed through [`Linear::parameters`].
#[derive(Debug)]
pub struct Linear {
    handle: OwnedHandle,
    api: &'static NativeApi,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Allocate a new layer.
    ///
    /// # Errors
    ///
    /// `Configuration` if either feature count is zero.
    pub fn new(bridge: Bridge, in_features: usize, out_features: usize) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(BridgeError::config(format!(
                "linear layer needs positive feature counts, got {in_features} -> {out_features}"
            )));
        }
        let too_large = in_features
            .checked_mul(out_features)
            .is_none_or(|n| i64::try_from(n).is_err());
        if too_large {
            return Err(BridgeError::config(format!(
                "linear layer {in_features} -> {out_features} has too many weights"
            )));
        }
        let api = bridge.api();
        let raw = api.call_ctor(CallSite::new("linear"), |status| unsafe {
            (api.linear_new)(in_features, out_features, status)
        })?;
        Ok(Self {
            handle: OwnedHandle::new(raw, ResourceKind::Layer, api.module_release),
            api,
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Apply the layer to `[in_features]` or `[batch, in_features]` input.
    ///
    /// The input tensor is left untouched; the output is a new tensor.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let module = self.handle.get()?;
        let x = input.raw()?;
        same_library("linear", self.api, input.api())?;

        let shape = input.shape();
        if !matches!(shape.rank(), 1 | 2) {
            return Err(BridgeError::UnsupportedRank {
                op: "linear",
                rank: shape.rank(),
            });
        }
        let weight_shape = [self.out_features as i64, self.in_features as i64];
        if shape.last() != Some(self.in_features as i64) {
            return Err(BridgeError::ShapeMismatch {
                op: "linear",
                lhs: shape.to_vec(),
                rhs: weight_shape.to_vec(),
            });
        }

        let api = self.api;
        let raw = api.call_ctor(
            CallSite::with_shapes("linear", shape, &weight_shape),
            |status| unsafe { (api.linear_forward)(module, x, status) },
        )?;
        Tensor::from_raw(api, raw)
    }

    /// Export the weight and bias as new tensor wrappers.
    ///
    /// Each returned tensor references the layer's own parameter storage, so
    /// an optimizer built from them updates the layer. The caller destroys
    /// the wrappers; that does not release the layer's parameters.
    pub fn parameters(&self) -> Result<Vec<Tensor>> {
        let module = self.handle.get()?;
        let api = self.api;
        let len = unsafe { (api.module_num_parameters)(module) };
        let mut raws: Vec<RawHandle> = vec![std::ptr::null_mut(); len];
        let code = unsafe { (api.module_parameters)(module, raws.as_mut_ptr(), len) };
        api.check(code, CallSite::new("parameters"))?;

        let mut params = Vec::with_capacity(len);
        let mut iter = raws.into_iter();
        while let Some(raw) = iter.next() {
            match Tensor::from_raw(api, raw) {
                Ok(tensor) => params.push(tensor),
                Err(err) => {
                    for rest in iter {
                        unsafe { (api.tensor_release)(rest) };
                    }
                    for mut tensor in params {
                        tensor.destroy()?;
                    }
                    return Err(err);
                }
            }
        }
        Ok(params)
    }

    /// Release the native module and the parameters it owns.
    pub fn destroy(&mut self) -> Result<()> {
        self.handle.release()
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }
}
