//! Error types for the bridge.

use std::fmt;

use thiserror::Error;

/// Kind of native resource a wrapper owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Tensor,
    Layer,
    Optimizer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Tensor => "tensor",
            ResourceKind::Layer => "layer",
            ResourceKind::Optimizer => "optimizer",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid constructor arguments.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operand shapes are incompatible for the requested operation.
    #[error("shape mismatch in {op}: {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<i64>,
        rhs: Vec<i64>,
    },

    /// The operation does not model tensors of this rank.
    #[error("{op} does not support tensors of rank {rank}")]
    UnsupportedRank { op: &'static str, rank: usize },

    /// The wrapper was already released.
    #[error("{kind} used after release")]
    UseAfterRelease { kind: ResourceKind },

    /// Reverse-mode differentiation failed inside the native library.
    #[error("autograd error: {0}")]
    Autograd(String),

    /// Any other failure reported by the native library.
    #[error("native error in {op} (status {code}): {message}")]
    Native {
        op: &'static str,
        code: i32,
        message: String,
    },
}

impl BridgeError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        BridgeError::Configuration(message.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;
