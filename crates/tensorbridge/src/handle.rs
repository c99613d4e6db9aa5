//! Ownership of a single native handle.
//!
//! The native library does not guarantee that releasing a handle twice is
//! harmless, so every wrapper keeps a released flag here. All checks against
//! that flag happen on the host side; a released handle never reaches the
//! native layer again.

use std::ptr;

use log::{trace, warn};

use crate::error::{BridgeError, ResourceKind, Result};
use crate::native::{RawHandle, ReleaseFn};

/// Exclusive owner of one native handle.
///
/// Release happens through [`OwnedHandle::release`]. If the owner is dropped
/// while still live, `Drop` releases the handle and logs a leak warning.
pub(crate) struct OwnedHandle {
    raw: RawHandle,
    kind: ResourceKind,
    release_fn: ReleaseFn,
}

// SAFETY: the native table contract requires entry points callable from any
// thread, and the handle address itself carries no thread affinity.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    pub(crate) fn new(raw: RawHandle, kind: ResourceKind, release_fn: ReleaseFn) -> Self {
        debug_assert!(!raw.is_null());
        trace!("acquired {kind} handle {raw:p}");
        Self {
            raw,
            kind,
            release_fn,
        }
    }

    /// The live address, or `UseAfterRelease` once released.
    #[inline]
    pub(crate) fn get(&self) -> Result<RawHandle> {
        if self.raw.is_null() {
            Err(BridgeError::UseAfterRelease { kind: self.kind })
        } else {
            Ok(self.raw)
        }
    }

    #[inline]
    pub(crate) fn is_released(&self) -> bool {
        self.raw.is_null()
    }

    /// Release the handle. A second call is `UseAfterRelease`.
    pub(crate) fn release(&mut self) -> Result<()> {
        let raw = self.get()?;
        self.raw = ptr::null_mut();
        trace!("released {} handle {raw:p}", self.kind);
        unsafe { (self.release_fn)(raw) };
        Ok(())
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            warn!(
                "{} handle {:p} was never destroyed; releasing it on drop",
                self.kind, self.raw
            );
            unsafe { (self.release_fn)(self.raw) };
            self.raw = ptr::null_mut();
        }
    }
}

impl std::fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("kind", &self.kind)
            .field("raw", &self.raw)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_void;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static RELEASED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count_release(_handle: RawHandle) {
        RELEASED.fetch_add(1, Ordering::SeqCst);
    }

    fn dummy() -> RawHandle {
        Box::into_raw(Box::new(0u8)) as *mut c_void
    }

    fn free_dummy(raw: RawHandle) {
        unsafe { drop(Box::from_raw(raw as *mut u8)) };
    }

    // Both release paths share one counter, so they run in one test.
    #[test]
    fn test_release_paths() {
        let raw = dummy();
        let mut handle = OwnedHandle::new(raw, ResourceKind::Tensor, count_release);
        assert_eq!(handle.get().unwrap(), raw);
        let before = RELEASED.load(Ordering::SeqCst);

        handle.release().unwrap();
        assert!(handle.is_released());
        assert_eq!(RELEASED.load(Ordering::SeqCst), before + 1);

        let err = handle.release().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::UseAfterRelease {
                kind: ResourceKind::Tensor
            }
        ));
        assert!(handle.get().is_err());
        assert_eq!(RELEASED.load(Ordering::SeqCst), before + 1);

        drop(handle);
        assert_eq!(RELEASED.load(Ordering::SeqCst), before + 1);

        let leaked = dummy();
        drop(OwnedHandle::new(leaked, ResourceKind::Layer, count_release));
        assert_eq!(RELEASED.load(Ordering::SeqCst), before + 2);

        free_dummy(raw);
        free_dummy(leaked);
    }
}
