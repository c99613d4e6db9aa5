//! Status codes, panic capture and the thread-local last error.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;

use tensorbridge::native::{
    RawHandle, StatusCode, TB_AUTOGRAD_ERROR, TB_INTERNAL_ERROR, TB_INVALID_ARGUMENT,
    TB_SHAPE_MISMATCH, TB_SUCCESS, TB_UNSUPPORTED_RANK,
};
use thiserror::Error;

/// Errors raised inside the library before they are flattened to a status.
#[derive(Debug, Error)]
pub enum NativeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("unsupported rank: {0}")]
    UnsupportedRank(String),

    #[error("{0}")]
    Autograd(String),
}

impl NativeError {
    pub fn code(&self) -> StatusCode {
        match self {
            NativeError::InvalidArgument(_) => TB_INVALID_ARGUMENT,
            NativeError::ShapeMismatch(_) => TB_SHAPE_MISMATCH,
            NativeError::UnsupportedRank(_) => TB_UNSUPPORTED_RANK,
            NativeError::Autograd(_) => TB_AUTOGRAD_ERROR,
        }
    }
}

pub type NativeResult<T> = Result<T, NativeError>;

thread_local! {
    static LAST_ERROR: RefCell<String> = const { RefCell::new(String::new()) };
}

fn set_last_error(message: String) {
    LAST_ERROR.with(|e| *e.borrow_mut() = message);
}

fn clear_last_error() {
    LAST_ERROR.with(|e| e.borrow_mut().clear());
}

/// Copy the last error message into `buf` (NUL-terminated, truncated to
/// fit) and return its full length in bytes.
pub(crate) fn copy_last_error(buf: *mut libc::c_char, len: usize) -> usize {
    LAST_ERROR.with(|e| {
        let message = e.borrow();
        let bytes = message.as_bytes();
        if !buf.is_null() && len > 0 {
            let n = bytes.len().min(len - 1);
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr() as *const libc::c_char, buf, n);
                *buf.add(n) = 0;
            }
        }
        bytes.len()
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("internal panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("internal panic: {s}")
    } else {
        "internal panic".to_string()
    }
}

/// Run `f` behind a panic guard and flatten the outcome to a status code.
fn guarded<T>(f: impl FnOnce() -> NativeResult<T>) -> Result<T, StatusCode> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => {
            clear_last_error();
            Ok(value)
        }
        Ok(Err(err)) => {
            let code = err.code();
            log::debug!("native call failed: {err}");
            set_last_error(err.to_string());
            Err(code)
        }
        Err(payload) => {
            set_last_error(panic_message(payload.as_ref()));
            Err(TB_INTERNAL_ERROR)
        }
    }
}

/// Entry-point wrapper for constructors: writes `status`, returns null on failure.
pub(crate) fn ctor(status: *mut StatusCode, f: impl FnOnce() -> NativeResult<RawHandle>) -> RawHandle {
    if status.is_null() {
        return ptr::null_mut();
    }
    let (raw, code) = match guarded(f) {
        Ok(raw) => (raw, TB_SUCCESS),
        Err(code) => (ptr::null_mut(), code),
    };
    unsafe {
        *status = code;
    }
    raw
}

/// Entry-point wrapper for calls that only report a status.
pub(crate) fn status(f: impl FnOnce() -> NativeResult<()>) -> StatusCode {
    match guarded(f) {
        Ok(()) => TB_SUCCESS,
        Err(code) => code,
    }
}

/// Entry-point wrapper for infallible queries; falls back to `default`.
pub(crate) fn query<T>(default: T, f: impl FnOnce() -> NativeResult<T>) -> T {
    guarded(f).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            NativeError::ShapeMismatch("x".into()).code(),
            TB_SHAPE_MISMATCH
        );
        assert_eq!(NativeError::Autograd("x".into()).code(), TB_AUTOGRAD_ERROR);
    }

    #[test]
    fn test_status_records_message() {
        let code = status(|| Err(NativeError::InvalidArgument("bad shape".into())));
        assert_eq!(code, TB_INVALID_ARGUMENT);

        let mut buf = [0 as libc::c_char; 64];
        let len = copy_last_error(buf.as_mut_ptr(), buf.len());
        assert_eq!(len, "invalid argument: bad shape".len());
        let text: Vec<u8> = buf[..len].iter().map(|&c| c as u8).collect();
        assert_eq!(text, b"invalid argument: bad shape");
    }

    #[test]
    fn test_panic_is_captured() {
        let code = status(|| panic!("boom"));
        assert_eq!(code, TB_INTERNAL_ERROR);
        let mut buf = [0 as libc::c_char; 64];
        let len = copy_last_error(buf.as_mut_ptr(), buf.len());
        assert!(len > 0);
    }

    #[test]
    fn test_truncated_copy() {
        let _ = status(|| Err(NativeError::Autograd("a long message".into())));
        let mut buf = [1 as libc::c_char; 4];
        let len = copy_last_error(buf.as_mut_ptr(), buf.len());
        assert_eq!(len, "a long message".len());
        assert_eq!(buf[3], 0);
    }

    #[test]
    fn test_ctor_null_status() {
        let raw = ctor(ptr::null_mut(), || Ok(ptr::null_mut()));
        assert!(raw.is_null());
    }
}
