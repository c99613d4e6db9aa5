//! tensorbridge - safe handles over a native tensor library
//!
//! This crate lets a host manipulate tensors, layers and optimizers that are
//! allocated and owned by an external numeric library reached through a
//! flat C function table. The bridge never dereferences a native handle; it
//! owns handles, caches their shapes, checks what it can before crossing the
//! boundary, and turns native failures into typed errors.
//!
//! # Architecture
//!
//! ```text
//! Bridge ──creates──► Tensor / Linear / Optimizer
//!                          │
//!                          ▼
//!                     OwnedHandle (released flag, leak warning on drop)
//!                          │
//!                          ▼
//!                     NativeApi (#[repr(C)] table of extern "C" fns)
//!                          │
//!                          ▼
//!                     native library (e.g. tensorbridge-refcpu)
//! ```
//!
//! # Ownership rules
//!
//! - Every wrapper owns exactly one native handle and releases it through an
//!   explicit `destroy()`. A second `destroy()` or any use afterwards is
//!   [`BridgeError::UseAfterRelease`], detected without calling native code.
//! - `grad()` and `Linear::parameters()` return new wrappers the caller must
//!   destroy. Releasing them never releases what they were read from.
//! - An [`Optimizer`] references its parameters without owning them.
//!
//! # Example
//!
//! ```
//! use tensorbridge::{AdamConfig, Bridge};
//!
//! let bridge = Bridge::new(tensorbridge_refcpu::api());
//!
//! let mut a = bridge.ones(&[2, 2]).unwrap();
//! let mut b = bridge.ones(&[2, 2]).unwrap();
//! let mut c = a.matmul(&b).unwrap();
//! assert_eq!(c.to_array().unwrap(), vec![2.0, 2.0, 2.0, 2.0]);
//!
//! let mut w = bridge.from_array(&[1.0, 2.0, 3.0], None).unwrap();
//! w.set_requires_grad(true).unwrap();
//! let mut loss = w.multiply(&w).unwrap().sum().unwrap();
//! loss.backward().unwrap();
//!
//! let mut opt = bridge.adam([&w], AdamConfig::new(0.1)).unwrap();
//! opt.step().unwrap();
//! opt.zero_grad().unwrap();
//!
//! for t in [&mut a, &mut b, &mut c, &mut loss, &mut w] {
//!     t.destroy().unwrap();
//! }
//! opt.destroy().unwrap();
//! ```

mod autograd;
pub mod bridge;
pub mod config;
pub mod error;
pub mod native;
pub mod nn;
pub mod ops;
pub mod optim;
pub mod shape;
pub mod tensor;

mod handle;

pub use bridge::Bridge;
pub use config::{AdamConfig, SgdConfig};
pub use error::{BridgeError, ResourceKind, Result};
pub use native::NativeApi;
pub use nn::Linear;
pub use optim::{Optimizer, OptimizerKind};
pub use shape::Shape;
pub use tensor::Tensor;
