//! Host-visible tensor wrapper owning exactly one native handle.

use std::ptr;

use crate::bridge::Bridge;
use crate::error::{BridgeError, ResourceKind, Result};
use crate::handle::OwnedHandle;
use crate::native::{CallSite, NativeApi, RawHandle, ShapeCtorFn, internal_error};
use crate::shape::Shape;

/// A tensor allocated by the native library.
///
/// The wrapper caches the shape and the gradient-tracking flag when it is
/// created; neither is re-queried afterwards. The native handle stays valid
/// until [`Tensor::destroy`] is called, after which every operation on this
/// tensor fails with [`BridgeError::UseAfterRelease`].
///
/// # Example
///
/// ```
/// use tensorbridge::Bridge;
///
/// let bridge = Bridge::new(tensorbridge_refcpu::api());
/// let mut t = bridge.from_array(&[1.0, 2.0, 3.0, 4.0], Some(&[2, 2])).unwrap();
/// assert_eq!(t.shape(), &[2, 2]);
/// assert_eq!(t.to_array().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
///
/// t.destroy().unwrap();
/// assert!(t.destroy().is_err());
/// ```
#[derive(Debug)]
pub struct Tensor {
    handle: OwnedHandle,
    api: &'static NativeApi,
    shape: Shape,
    requires_grad: bool,
}

impl Tensor {
    /// Wrap a freshly returned native handle, caching its metadata.
    pub(crate) fn from_raw(api: &'static NativeApi, raw: RawHandle) -> Result<Self> {
        let mut handle = OwnedHandle::new(raw, ResourceKind::Tensor, api.tensor_release);
        match api.query_shape(raw) {
            Ok(shape) => {
                let requires_grad = unsafe { (api.tensor_requires_grad)(raw) } != 0;
                Ok(Self {
                    handle,
                    api,
                    shape,
                    requires_grad,
                })
            }
            Err(err) => {
                handle.release()?;
                Err(err)
            }
        }
    }

    fn filled(bridge: Bridge, op: &'static str, ctor: ShapeCtorFn, dims: &[i64]) -> Result<Self> {
        let shape = Shape::checked(dims)?;
        let api = bridge.api();
        let raw = api.call_ctor(CallSite::with_shapes(op, &shape, &[]), |status| unsafe {
            ctor(shape_ptr(&shape), shape.rank(), status)
        })?;
        Self::from_raw(api, raw)
    }

    /// Tensor of the given shape filled with `0.0`.
    pub fn zeros(bridge: Bridge, shape: &[i64]) -> Result<Self> {
        Self::filled(bridge, "zeros", bridge.api().tensor_zeros, shape)
    }

    /// Tensor of the given shape filled with `1.0`.
    pub fn ones(bridge: Bridge, shape: &[i64]) -> Result<Self> {
        Self::filled(bridge, "ones", bridge.api().tensor_ones, shape)
    }

    /// Tensor of the given shape with standard normal samples.
    pub fn randn(bridge: Bridge, shape: &[i64]) -> Result<Self> {
        Self::filled(bridge, "randn", bridge.api().tensor_randn, shape)
    }

    /// Tensor from row-major values.
    ///
    /// Without `shape` the result is rank 1 with `values.len()` elements.
    /// With a two-element `shape` the result is rank 2 and `values.len()`
    /// must equal the product of the shape.
    ///
    /// # Errors
    ///
    /// - `UnsupportedRank` if `shape` has a length other than 2.
    /// - `ShapeMismatch` if the value count does not fill the shape, including
    ///   shapes whose element count overflows `usize`.
    /// - `Configuration` if the shape has a negative dimension.
    pub fn from_array(bridge: Bridge, values: &[f64], shape: Option<&[i64]>) -> Result<Self> {
        let shape = match shape {
            None => Shape::from(vec![values.len() as i64]),
            Some(dims) if dims.len() == 2 => Shape::non_negative(dims)?,
            Some(dims) => {
                return Err(BridgeError::UnsupportedRank {
                    op: "from_array",
                    rank: dims.len(),
                });
            }
        };
        if shape.checked_numel() != Some(values.len()) {
            return Err(BridgeError::ShapeMismatch {
                op: "from_array",
                lhs: vec![values.len() as i64],
                rhs: shape.to_vec(),
            });
        }

        let api = bridge.api();
        let data = if values.is_empty() {
            ptr::null()
        } else {
            values.as_ptr()
        };
        let raw = api.call_ctor(
            CallSite::with_shapes("from_array", &shape, &[]),
            |status| unsafe {
                (api.tensor_from_data)(data, values.len(), shape_ptr(&shape), shape.rank(), status)
            },
        )?;
        Self::from_raw(api, raw)
    }

    /// Cached shape.
    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Number of dimensions.
    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Number of elements, from the cached shape.
    #[inline]
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Whether [`Tensor::destroy`] has been called.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    /// Copy the elements into a host-owned row-major buffer.
    ///
    /// The tensor stays valid.
    pub fn to_array(&self) -> Result<Vec<f64>> {
        let raw = self.raw()?;
        self.api.copy_data(raw)
    }

    /// Value of a one-element tensor.
    pub fn item(&self) -> Result<f64> {
        let raw = self.raw()?;
        if self.numel() != 1 {
            return Err(BridgeError::ShapeMismatch {
                op: "item",
                lhs: self.shape.to_vec(),
                rhs: Vec::new(),
            });
        }
        let data = self.api.copy_data(raw)?;
        data.first()
            .copied()
            .ok_or_else(|| internal_error("item", "native library returned no data"))
    }

    /// Release the native handle.
    ///
    /// # Errors
    ///
    /// `UseAfterRelease` if the tensor was already destroyed.
    pub fn destroy(&mut self) -> Result<()> {
        self.handle.release()
    }

    #[inline]
    pub(crate) fn raw(&self) -> Result<RawHandle> {
        self.handle.get()
    }

    #[inline]
    pub(crate) fn api(&self) -> &'static NativeApi {
        self.api
    }

    #[inline]
    pub(crate) fn set_requires_grad_flag(&mut self, flag: bool) {
        self.requires_grad = flag;
    }

    #[inline]
    pub(crate) fn requires_grad_flag(&self) -> bool {
        self.requires_grad
    }
}

/// Pointer to shape dims, null for rank 0.
pub(crate) fn shape_ptr(shape: &Shape) -> *const i64 {
    if shape.rank() == 0 {
        ptr::null()
    } else {
        shape.dims().as_ptr()
    }
}

/// Both operands must come from the same native library.
pub(crate) fn same_library(op: &'static str, a: &'static NativeApi, b: &'static NativeApi) -> Result<()> {
    if ptr::eq(a, b) {
        Ok(())
    } else {
        Err(BridgeError::config(format!(
            "{op}: operands were created by different native libraries"
        )))
    }
}
