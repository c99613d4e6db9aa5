//! Reference CPU implementation of the tensorbridge native function table.
//!
//! Tensors are dense row-major `f64` buffers tracked by a reverse-mode
//! autograd graph. Every entry point is `extern "C"` and exported unmangled,
//! so the crate builds as a `cdylib`/`staticlib` for foreign callers as well
//! as an `rlib` whose [`api`] table plugs straight into
//! [`tensorbridge::Bridge`].
//!
//! ```text
//! tensor handle     → Box<Arc<TensorNode>>
//! module handle     → Box<LinearModule>
//! optimizer handle  → Box<OptimizerState>
//! ```
//!
//! Panics never cross the boundary: they are caught and reported as
//! `TB_INTERNAL_ERROR`, with the message available through `tbr_last_error`.

#![allow(clippy::not_unsafe_ptr_arg_deref)]

pub mod autograd;
pub mod broadcast;
pub mod dense;
pub mod nn;
pub mod ops;
pub mod optim;
pub mod random;
pub mod status;

use std::ptr;
use std::slice;

use libc::{c_char, c_double, c_int, size_t};
use tensorbridge::native::{NativeApi, RawHandle, StatusCode};

use crate::autograd::{TensorNode, TensorRef};
use crate::dense::{Dense, checked_numel};
use crate::nn::LinearModule;
use crate::optim::{AdamParams, OptimizerState, SgdParams};
use crate::status::{NativeError, NativeResult};

// ============================================================================
// Handle helpers
// ============================================================================

fn into_handle(tensor: TensorRef) -> RawHandle {
    Box::into_raw(Box::new(tensor)) as RawHandle
}

/// # Safety
/// `handle` must be null or come from [`into_handle`] and not be released.
unsafe fn tensor_ref<'a>(handle: RawHandle) -> NativeResult<&'a TensorRef> {
    if handle.is_null() {
        return Err(NativeError::InvalidArgument("null tensor handle".to_string()));
    }
    Ok(unsafe { &*(handle as *const TensorRef) })
}

/// # Safety
/// `handle` must be null or a live module handle.
unsafe fn module_ref<'a>(handle: RawHandle) -> NativeResult<&'a LinearModule> {
    if handle.is_null() {
        return Err(NativeError::InvalidArgument("null module handle".to_string()));
    }
    Ok(unsafe { &*(handle as *const LinearModule) })
}

/// # Safety
/// `handle` must be null or a live optimizer handle not aliased elsewhere.
unsafe fn optimizer_mut<'a>(handle: RawHandle) -> NativeResult<&'a mut OptimizerState> {
    if handle.is_null() {
        return Err(NativeError::InvalidArgument("null optimizer handle".to_string()));
    }
    Ok(unsafe { &mut *(handle as *mut OptimizerState) })
}

fn read_shape(shape: *const i64, ndim: size_t) -> NativeResult<Vec<usize>> {
    if ndim == 0 {
        return Ok(Vec::new());
    }
    if shape.is_null() {
        return Err(NativeError::InvalidArgument(format!(
            "null shape pointer with ndim {ndim}"
        )));
    }
    let dims = unsafe { slice::from_raw_parts(shape, ndim) };
    let shape = dims
        .iter()
        .map(|&d| {
            usize::try_from(d).map_err(|_| {
                NativeError::InvalidArgument(format!("negative dimension {d} in shape {dims:?}"))
            })
        })
        .collect::<NativeResult<Vec<usize>>>()?;
    if checked_numel(&shape).is_none() {
        return Err(NativeError::InvalidArgument(format!(
            "shape {dims:?} has more elements than fit in memory"
        )));
    }
    Ok(shape)
}

fn read_params(params: *const RawHandle, len: size_t) -> NativeResult<Vec<TensorRef>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    if params.is_null() {
        return Err(NativeError::InvalidArgument(
            "null parameter array".to_string(),
        ));
    }
    let handles = unsafe { slice::from_raw_parts(params, len) };
    handles
        .iter()
        .map(|&h| unsafe { tensor_ref(h) }.cloned())
        .collect()
}

fn shape_ctor(
    shape: *const i64,
    ndim: size_t,
    status: *mut StatusCode,
    make: impl FnOnce(&[usize]) -> Dense,
) -> RawHandle {
    status::ctor(status, || {
        let shape = read_shape(shape, ndim)?;
        Ok(into_handle(TensorNode::leaf(make(&shape))))
    })
}

fn unary(
    a: RawHandle,
    status: *mut StatusCode,
    op: fn(&TensorRef) -> NativeResult<TensorRef>,
) -> RawHandle {
    status::ctor(status, || {
        let a = unsafe { tensor_ref(a) }?;
        Ok(into_handle(op(a)?))
    })
}

fn binary(
    a: RawHandle,
    b: RawHandle,
    status: *mut StatusCode,
    op: fn(&TensorRef, &TensorRef) -> NativeResult<TensorRef>,
) -> RawHandle {
    status::ctor(status, || {
        let a = unsafe { tensor_ref(a) }?;
        let b = unsafe { tensor_ref(b) }?;
        Ok(into_handle(op(a, b)?))
    })
}

// ============================================================================
// Library-wide
// ============================================================================

/// Reseed the process-wide generator used by `randn` and layer init.
#[unsafe(no_mangle)]
pub extern "C" fn tbr_manual_seed(seed: u64) {
    random::manual_seed(seed);
}

/// Copy the calling thread's last error message into `buf`.
///
/// Returns the full message length; the copy is truncated to `len - 1`
/// bytes and NUL-terminated.
#[unsafe(no_mangle)]
pub extern "C" fn tbr_last_error(buf: *mut c_char, len: size_t) -> size_t {
    status::copy_last_error(buf, len)
}

// ============================================================================
// Tensor creation and release
// ============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_zeros(
    shape: *const i64,
    ndim: size_t,
    status: *mut StatusCode,
) -> RawHandle {
    shape_ctor(shape, ndim, status, Dense::zeros)
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_ones(
    shape: *const i64,
    ndim: size_t,
    status: *mut StatusCode,
) -> RawHandle {
    shape_ctor(shape, ndim, status, |s| Dense::full(s, 1.0))
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_randn(
    shape: *const i64,
    ndim: size_t,
    status: *mut StatusCode,
) -> RawHandle {
    shape_ctor(shape, ndim, status, random::randn)
}

/// Create a tensor from `len` row-major values.
///
/// `len` must equal the product of `shape`.
#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_from_data(
    data: *const c_double,
    len: size_t,
    shape: *const i64,
    ndim: size_t,
    status: *mut StatusCode,
) -> RawHandle {
    status::ctor(status, || {
        let shape = read_shape(shape, ndim)?;
        let values = if len == 0 {
            Vec::new()
        } else if data.is_null() {
            return Err(NativeError::InvalidArgument("null data pointer".to_string()));
        } else {
            unsafe { slice::from_raw_parts(data, len) }.to_vec()
        };
        Ok(into_handle(TensorNode::leaf(Dense::from_vec(values, &shape)?)))
    })
}

/// Release a tensor handle. Null is ignored.
#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_release(tensor: RawHandle) {
    if !tensor.is_null() {
        unsafe {
            drop(Box::from_raw(tensor as *mut TensorRef));
        }
    }
}

// ============================================================================
// Tensor queries
// ============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_ndim(tensor: RawHandle) -> size_t {
    status::query(0, || Ok(unsafe { tensor_ref(tensor) }?.value().ndim()))
}

/// Write the shape into `out`, which must hold `ndim` entries.
/// `out` may be null for a scalar.
#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_shape(tensor: RawHandle, out: *mut i64) -> StatusCode {
    status::status(|| {
        let shape = unsafe { tensor_ref(tensor) }?.shape();
        if shape.is_empty() {
            return Ok(());
        }
        if out.is_null() {
            return Err(NativeError::InvalidArgument("null shape buffer".to_string()));
        }
        let out = unsafe { slice::from_raw_parts_mut(out, shape.len()) };
        for (o, &d) in out.iter_mut().zip(&shape) {
            *o = d as i64;
        }
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_numel(tensor: RawHandle) -> size_t {
    status::query(0, || Ok(unsafe { tensor_ref(tensor) }?.value().len()))
}

/// Copy the row-major values into `out`; `len` must equal the element count.
#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_copy_data(
    tensor: RawHandle,
    out: *mut c_double,
    len: size_t,
) -> StatusCode {
    status::status(|| {
        let tensor = unsafe { tensor_ref(tensor) }?;
        let value = tensor.value();
        if value.len() != len {
            return Err(NativeError::InvalidArgument(format!(
                "buffer holds {len} values, tensor has {}",
                value.len()
            )));
        }
        if len == 0 {
            return Ok(());
        }
        if out.is_null() {
            return Err(NativeError::InvalidArgument("null data buffer".to_string()));
        }
        unsafe { ptr::copy_nonoverlapping(value.data().as_ptr(), out, len) };
        Ok(())
    })
}

// ============================================================================
// Operations
// ============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_add(a: RawHandle, b: RawHandle, status: *mut StatusCode) -> RawHandle {
    binary(a, b, status, ops::add)
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_sub(a: RawHandle, b: RawHandle, status: *mut StatusCode) -> RawHandle {
    binary(a, b, status, ops::sub)
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_mul(a: RawHandle, b: RawHandle, status: *mut StatusCode) -> RawHandle {
    binary(a, b, status, ops::mul)
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_matmul(
    a: RawHandle,
    b: RawHandle,
    status: *mut StatusCode,
) -> RawHandle {
    binary(a, b, status, ops::matmul)
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_transpose(a: RawHandle, status: *mut StatusCode) -> RawHandle {
    unary(a, status, ops::transpose)
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_relu(a: RawHandle, status: *mut StatusCode) -> RawHandle {
    unary(a, status, ops::relu)
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_sigmoid(a: RawHandle, status: *mut StatusCode) -> RawHandle {
    unary(a, status, ops::sigmoid)
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_sum(a: RawHandle, status: *mut StatusCode) -> RawHandle {
    unary(a, status, ops::sum)
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_mean(a: RawHandle, status: *mut StatusCode) -> RawHandle {
    unary(a, status, ops::mean)
}

// ============================================================================
// Autograd
// ============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_set_requires_grad(tensor: RawHandle, requires_grad: c_int) -> StatusCode {
    status::status(|| unsafe { tensor_ref(tensor) }?.set_requires_grad(requires_grad != 0))
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_requires_grad(tensor: RawHandle) -> c_int {
    status::query(0, || {
        Ok(c_int::from(unsafe { tensor_ref(tensor) }?.requires_grad()))
    })
}

/// Backpropagate from a scalar tensor into every reachable leaf.
#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_backward(tensor: RawHandle) -> StatusCode {
    status::status(|| autograd::backward(unsafe { tensor_ref(tensor) }?))
}

/// New handle to the accumulated gradient, or null if there is none.
#[unsafe(no_mangle)]
pub extern "C" fn tbr_tensor_grad(tensor: RawHandle) -> RawHandle {
    status::query(ptr::null_mut(), || {
        Ok(unsafe { tensor_ref(tensor) }?
            .grad()
            .map_or(ptr::null_mut(), into_handle))
    })
}

// ============================================================================
// Modules
// ============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn tbr_linear_new(
    in_features: size_t,
    out_features: size_t,
    status: *mut StatusCode,
) -> RawHandle {
    status::ctor(status, || {
        let module = LinearModule::new(in_features, out_features)?;
        Ok(Box::into_raw(Box::new(module)) as RawHandle)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_linear_forward(
    module: RawHandle,
    x: RawHandle,
    status: *mut StatusCode,
) -> RawHandle {
    status::ctor(status, || {
        let module = unsafe { module_ref(module) }?;
        let x = unsafe { tensor_ref(x) }?;
        Ok(into_handle(module.forward(x)?))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_module_num_parameters(module: RawHandle) -> size_t {
    status::query(0, || Ok(unsafe { module_ref(module) }?.parameters().len()))
}

/// Write one new tensor handle per parameter into `out`.
///
/// `len` must equal `tbr_module_num_parameters`. The caller owns the handles.
#[unsafe(no_mangle)]
pub extern "C" fn tbr_module_parameters(
    module: RawHandle,
    out: *mut RawHandle,
    len: size_t,
) -> StatusCode {
    status::status(|| {
        let params = unsafe { module_ref(module) }?.parameters();
        if len != params.len() {
            return Err(NativeError::InvalidArgument(format!(
                "module has {} parameters, buffer holds {len}",
                params.len()
            )));
        }
        if out.is_null() {
            return Err(NativeError::InvalidArgument("null parameter buffer".to_string()));
        }
        let out = unsafe { slice::from_raw_parts_mut(out, len) };
        for (slot, param) in out.iter_mut().zip(params) {
            *slot = into_handle(param);
        }
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_module_release(module: RawHandle) {
    if !module.is_null() {
        unsafe {
            drop(Box::from_raw(module as *mut LinearModule));
        }
    }
}

// ============================================================================
// Optimizers
// ============================================================================

#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn tbr_optimizer_adam(
    params: *const RawHandle,
    len: size_t,
    lr: c_double,
    beta1: c_double,
    beta2: c_double,
    eps: c_double,
    weight_decay: c_double,
    status: *mut StatusCode,
) -> RawHandle {
    status::ctor(status, || {
        let hyper = AdamParams {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        };
        let state = OptimizerState::adam(read_params(params, len)?, hyper)?;
        Ok(Box::into_raw(Box::new(state)) as RawHandle)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_optimizer_sgd(
    params: *const RawHandle,
    len: size_t,
    lr: c_double,
    momentum: c_double,
    weight_decay: c_double,
    status: *mut StatusCode,
) -> RawHandle {
    status::ctor(status, || {
        let hyper = SgdParams {
            lr,
            momentum,
            weight_decay,
        };
        let state = OptimizerState::sgd(read_params(params, len)?, hyper)?;
        Ok(Box::into_raw(Box::new(state)) as RawHandle)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_optimizer_step(optimizer: RawHandle) -> StatusCode {
    status::status(|| unsafe { optimizer_mut(optimizer) }?.step())
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_optimizer_zero_grad(optimizer: RawHandle) -> StatusCode {
    status::status(|| {
        unsafe { optimizer_mut(optimizer) }?.zero_grad();
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn tbr_optimizer_release(optimizer: RawHandle) {
    if !optimizer.is_null() {
        unsafe {
            drop(Box::from_raw(optimizer as *mut OptimizerState));
        }
    }
}

// ============================================================================
// Function table
// ============================================================================

static API: NativeApi = NativeApi {
    manual_seed: tbr_manual_seed,
    last_error: tbr_last_error,
    tensor_zeros: tbr_tensor_zeros,
    tensor_ones: tbr_tensor_ones,
    tensor_randn: tbr_tensor_randn,
    tensor_from_data: tbr_tensor_from_data,
    tensor_release: tbr_tensor_release,
    tensor_ndim: tbr_tensor_ndim,
    tensor_shape: tbr_tensor_shape,
    tensor_numel: tbr_tensor_numel,
    tensor_copy_data: tbr_tensor_copy_data,
    tensor_add: tbr_tensor_add,
    tensor_sub: tbr_tensor_sub,
    tensor_mul: tbr_tensor_mul,
    tensor_matmul: tbr_tensor_matmul,
    tensor_transpose: tbr_tensor_transpose,
    tensor_relu: tbr_tensor_relu,
    tensor_sigmoid: tbr_tensor_sigmoid,
    tensor_sum: tbr_tensor_sum,
    tensor_mean: tbr_tensor_mean,
    tensor_set_requires_grad: tbr_tensor_set_requires_grad,
    tensor_requires_grad: tbr_tensor_requires_grad,
    tensor_backward: tbr_tensor_backward,
    tensor_grad: tbr_tensor_grad,
    linear_new: tbr_linear_new,
    linear_forward: tbr_linear_forward,
    module_num_parameters: tbr_module_num_parameters,
    module_parameters: tbr_module_parameters,
    module_release: tbr_module_release,
    optimizer_adam: tbr_optimizer_adam,
    optimizer_sgd: tbr_optimizer_sgd,
    optimizer_step: tbr_optimizer_step,
    optimizer_zero_grad: tbr_optimizer_zero_grad,
    optimizer_release: tbr_optimizer_release,
};

/// The function table of this library, for [`tensorbridge::Bridge::new`].
pub fn api() -> &'static NativeApi {
    &API
}
