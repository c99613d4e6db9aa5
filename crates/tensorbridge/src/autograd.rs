//! Gradient tracking on top of the tensor wrapper.
//!
//! The native library records the operation graph and accumulates
//! gradients on leaf tensors. Gradients keep accumulating across
//! `backward()` calls until they are cleared (for example through
//! [`Optimizer::zero_grad`](crate::Optimizer::zero_grad)); the bridge never
//! zeroes them on its own.

use libc::c_int;
use log::debug;

use crate::error::Result;
use crate::native::CallSite;
use crate::tensor::Tensor;

impl Tensor {
    /// Turn native gradient tracking on or off for this tensor.
    pub fn set_requires_grad(&mut self, flag: bool) -> Result<()> {
        let raw = self.raw()?;
        let api = self.api();
        let code = unsafe { (api.tensor_set_requires_grad)(raw, flag as c_int) };
        api.check(code, CallSite::with_shapes("requires_grad", self.shape(), &[]))?;
        self.set_requires_grad_flag(flag);
        Ok(())
    }

    /// Whether gradients are tracked for this tensor.
    ///
    /// Results of operations on tracked tensors are tracked too.
    ///
    /// The flag is read from the native library when the wrapper is created
    /// and updated only by this wrapper's [`Tensor::set_requires_grad`].
    /// Several wrappers can alias one native tensor, for example the results
    /// of two [`Linear::parameters`](crate::Linear::parameters) calls. A change
    /// made through one of them is not seen by the others until a new wrapper
    /// is created.
    pub fn requires_grad(&self) -> bool {
        self.requires_grad_flag()
    }

    /// Run reverse-mode differentiation starting at this tensor.
    ///
    /// The native convention applies: without an explicit output gradient
    /// the tensor must hold a single element.
    ///
    /// # Errors
    ///
    /// `Autograd` with the native message when differentiation fails, e.g.
    /// for a non-scalar tensor or one that does not require gradients.
    pub fn backward(&self) -> Result<()> {
        let raw = self.raw()?;
        let api = self.api();
        debug!("backward from tensor of shape {:?}", self.shape());
        let code = unsafe { (api.tensor_backward)(raw) };
        api.check(code, CallSite::with_shapes("backward", self.shape(), &[]))
    }

    /// Accumulated gradient of this tensor, if one is defined.
    ///
    /// `Ok(None)` is the normal answer for tensors that never took part in a
    /// backward pass. A returned gradient is a new wrapper the caller must
    /// destroy; destroying it does not affect this tensor.
    pub fn grad(&self) -> Result<Option<Tensor>> {
        let raw = self.raw()?;
        let api = self.api();
        let grad = unsafe { (api.tensor_grad)(raw) };
        if grad.is_null() {
            return Ok(None);
        }
        Tensor::from_raw(api, grad).map(Some)
    }
}
