//! The flat C function table a native tensor library exposes to the bridge.
//!
//! Conventions shared by every entry point:
//!
//! ```text
//! tensors, modules, optimizers  → opaque `*mut c_void`, never dereferenced here
//! shapes                        → `*const i64` + explicit count
//! element data                  → `*const f64` / `*mut f64` + explicit count
//! fallible constructors         → status written through `*mut StatusCode`,
//!                                 null returned on failure
//! gradient absence              → null address (not an error)
//! ```
//!
//! Every entry point must be callable from any thread. Access to one handle
//! from two threads at once is serialized by the caller, never by the table.

use std::ffi::{c_char, c_void};
use std::ptr;

use libc::{c_double, c_int, size_t};

use crate::error::{BridgeError, Result};
use crate::shape::Shape;

/// Opaque address of a native object.
pub type RawHandle = *mut c_void;

/// Status code reported by native entry points.
pub type StatusCode = c_int;

pub const TB_SUCCESS: StatusCode = 0;
pub const TB_INVALID_ARGUMENT: StatusCode = -1;
pub const TB_SHAPE_MISMATCH: StatusCode = -2;
pub const TB_UNSUPPORTED_RANK: StatusCode = -3;
pub const TB_AUTOGRAD_ERROR: StatusCode = -4;
pub const TB_INTERNAL_ERROR: StatusCode = -5;

/// Constructor taking a shape.
pub type ShapeCtorFn =
    unsafe extern "C" fn(shape: *const i64, ndim: size_t, status: *mut StatusCode) -> RawHandle;
/// Operation with one tensor operand producing a new tensor.
pub type UnaryFn = unsafe extern "C" fn(a: RawHandle, status: *mut StatusCode) -> RawHandle;
/// Operation with two tensor operands producing a new tensor.
pub type BinaryFn =
    unsafe extern "C" fn(a: RawHandle, b: RawHandle, status: *mut StatusCode) -> RawHandle;
/// Release of any native object.
pub type ReleaseFn = unsafe extern "C" fn(handle: RawHandle);

/// Function table of a native tensor library.
///
/// Obtained once from the library (e.g. `tensorbridge_refcpu::api()`) and
/// shared by every wrapper created through a [`Bridge`](crate::Bridge).
#[repr(C)]
pub struct NativeApi {
    pub manual_seed: unsafe extern "C" fn(seed: u64),
    pub last_error: unsafe extern "C" fn(buf: *mut c_char, len: size_t) -> size_t,

    pub tensor_zeros: ShapeCtorFn,
    pub tensor_ones: ShapeCtorFn,
    pub tensor_randn: ShapeCtorFn,
    pub tensor_from_data: unsafe extern "C" fn(
        data: *const c_double,
        len: size_t,
        shape: *const i64,
        ndim: size_t,
        status: *mut StatusCode,
    ) -> RawHandle,
    pub tensor_release: ReleaseFn,

    pub tensor_ndim: unsafe extern "C" fn(tensor: RawHandle) -> size_t,
    pub tensor_shape: unsafe extern "C" fn(tensor: RawHandle, out: *mut i64) -> StatusCode,
    pub tensor_numel: unsafe extern "C" fn(tensor: RawHandle) -> size_t,
    pub tensor_copy_data:
        unsafe extern "C" fn(tensor: RawHandle, out: *mut c_double, len: size_t) -> StatusCode,

    pub tensor_add: BinaryFn,
    pub tensor_sub: BinaryFn,
    pub tensor_mul: BinaryFn,
    pub tensor_matmul: BinaryFn,
    pub tensor_transpose: UnaryFn,
    pub tensor_relu: UnaryFn,
    pub tensor_sigmoid: UnaryFn,
    pub tensor_sum: UnaryFn,
    pub tensor_mean: UnaryFn,

    pub tensor_set_requires_grad:
        unsafe extern "C" fn(tensor: RawHandle, requires_grad: c_int) -> StatusCode,
    pub tensor_requires_grad: unsafe extern "C" fn(tensor: RawHandle) -> c_int,
    pub tensor_backward: unsafe extern "C" fn(tensor: RawHandle) -> StatusCode,
    pub tensor_grad: unsafe extern "C" fn(tensor: RawHandle) -> RawHandle,

    pub linear_new: unsafe extern "C" fn(
        in_features: size_t,
        out_features: size_t,
        status: *mut StatusCode,
    ) -> RawHandle,
    pub linear_forward: BinaryFn,
    pub module_num_parameters: unsafe extern "C" fn(module: RawHandle) -> size_t,
    pub module_parameters:
        unsafe extern "C" fn(module: RawHandle, out: *mut RawHandle, len: size_t) -> StatusCode,
    pub module_release: ReleaseFn,

    pub optimizer_adam: unsafe extern "C" fn(
        params: *const RawHandle,
        len: size_t,
        lr: c_double,
        beta1: c_double,
        beta2: c_double,
        eps: c_double,
        weight_decay: c_double,
        status: *mut StatusCode,
    ) -> RawHandle,
    pub optimizer_sgd: unsafe extern "C" fn(
        params: *const RawHandle,
        len: size_t,
        lr: c_double,
        momentum: c_double,
        weight_decay: c_double,
        status: *mut StatusCode,
    ) -> RawHandle,
    pub optimizer_step: unsafe extern "C" fn(optimizer: RawHandle) -> StatusCode,
    pub optimizer_zero_grad: unsafe extern "C" fn(optimizer: RawHandle) -> StatusCode,
    pub optimizer_release: ReleaseFn,
}

impl std::fmt::Debug for NativeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeApi").finish_non_exhaustive()
    }
}

/// Failure detected on the host side after a call reported success.
pub(crate) fn internal_error(op: &'static str, message: &str) -> BridgeError {
    BridgeError::Native {
        op,
        code: TB_INTERNAL_ERROR,
        message: message.to_string(),
    }
}

/// Context of a native call, used to build a typed error from a status code.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallSite<'a> {
    pub op: &'static str,
    pub lhs: &'a [i64],
    pub rhs: &'a [i64],
}

impl<'a> CallSite<'a> {
    pub(crate) fn new(op: &'static str) -> Self {
        Self {
            op,
            lhs: &[],
            rhs: &[],
        }
    }

    pub(crate) fn with_shapes(op: &'static str, lhs: &'a [i64], rhs: &'a [i64]) -> Self {
        Self { op, lhs, rhs }
    }
}

impl NativeApi {
    /// Read the thread-local error message left by the last failing call.
    ///
    /// The first call only asks for the length, so long messages come back
    /// whole.
    pub(crate) fn last_error_message(&self) -> String {
        let full = unsafe { (self.last_error)(ptr::null_mut(), 0) };
        if full == 0 {
            return String::new();
        }
        let mut buf = vec![0 as c_char; full + 1];
        let written = unsafe { (self.last_error)(buf.as_mut_ptr(), buf.len()) };
        let len = written.min(full);
        let bytes: Vec<u8> = buf[..len].iter().map(|&c| c as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Map a non-success status to the closest bridge error.
    pub(crate) fn status_error(&self, code: StatusCode, site: CallSite<'_>) -> BridgeError {
        let message = self.last_error_message();
        match code {
            TB_SHAPE_MISMATCH => BridgeError::ShapeMismatch {
                op: site.op,
                lhs: site.lhs.to_vec(),
                rhs: site.rhs.to_vec(),
            },
            TB_UNSUPPORTED_RANK => BridgeError::UnsupportedRank {
                op: site.op,
                rank: site.lhs.len().max(site.rhs.len()),
            },
            TB_AUTOGRAD_ERROR => BridgeError::Autograd(message),
            _ => BridgeError::Native {
                op: site.op,
                code,
                message,
            },
        }
    }

    pub(crate) fn check(&self, code: StatusCode, site: CallSite<'_>) -> Result<()> {
        if code == TB_SUCCESS {
            Ok(())
        } else {
            Err(self.status_error(code, site))
        }
    }

    /// Run a constructor-style entry point and turn its status into a result.
    pub(crate) fn call_ctor(
        &self,
        site: CallSite<'_>,
        f: impl FnOnce(*mut StatusCode) -> RawHandle,
    ) -> Result<RawHandle> {
        let mut status: StatusCode = TB_INTERNAL_ERROR;
        let raw = f(&mut status);
        if status != TB_SUCCESS {
            return Err(self.status_error(status, site));
        }
        if raw.is_null() {
            return Err(internal_error(site.op, "native library returned a null handle"));
        }
        Ok(raw)
    }

    /// Query the shape of a live tensor.
    pub(crate) fn query_shape(&self, raw: RawHandle) -> Result<Shape> {
        let ndim = unsafe { (self.tensor_ndim)(raw) };
        let mut dims = vec![0i64; ndim];
        let out = if ndim == 0 {
            ptr::null_mut()
        } else {
            dims.as_mut_ptr()
        };
        let code = unsafe { (self.tensor_shape)(raw, out) };
        self.check(code, CallSite::new("shape"))?;
        Ok(Shape::from(dims))
    }

    /// Copy a tensor's elements into a freshly allocated host buffer.
    pub(crate) fn copy_data(&self, raw: RawHandle) -> Result<Vec<f64>> {
        let len = unsafe { (self.tensor_numel)(raw) };
        let mut data = vec![0.0f64; len];
        let code = unsafe { (self.tensor_copy_data)(raw, data.as_mut_ptr(), len) };
        self.check(code, CallSite::new("to_array"))?;
        Ok(data)
    }
}
