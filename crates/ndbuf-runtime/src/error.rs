//! Error types for kernel launches.

use ndbuf_core::BufferError;
use thiserror::Error;

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors that can occur while launching or running a kernel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// A kernel chunk panicked during execution.
    #[error("kernel panicked: {0}")]
    Panicked(String),

    /// The target descriptor cannot be written by the kernel.
    #[error("invalid kernel target: {0}")]
    Buffer(#[from] BufferError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndbuf_core::ElementKind;

    #[test]
    fn test_error_display() {
        let err = KernelError::Panicked("index out of bounds".to_string());
        assert_eq!(err.to_string(), "kernel panicked: index out of bounds");

        let err: KernelError = BufferError::ElementMismatch {
            expected: ElementKind::Int32,
            requested: ElementKind::Float64,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "invalid kernel target: element type mismatch: descriptor holds int32, requested double"
        );
    }
}
