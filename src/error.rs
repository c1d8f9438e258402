//! marginr error types

use numr::dtype::DType;

/// marginr result type
pub type Result<T> = std::result::Result<T, Error>;

/// marginr errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from numr operations
    #[error("numr error: {0}")]
    Numr(#[from] numr::error::Error),

    /// Scalar parameter outside its supported domain (e.g. `p` not in {1, 2})
    #[error("invalid parameter '{arg}': {reason}")]
    InvalidParameter {
        /// Parameter name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Tensor rank or size inconsistent with the operation
    #[error("invalid shape for '{arg}': {reason}")]
    InvalidShape {
        /// Argument name
        arg: &'static str,
        /// What was expected vs. what was found
        reason: String,
    },

    /// Target class index outside `[0, num_classes)`
    #[error("target[{index}] = {value} is out of range for {num_classes} classes")]
    InvalidTarget {
        /// Sample index
        index: usize,
        /// Offending class index
        value: i64,
        /// Number of classes (D)
        num_classes: usize,
    },

    /// DType not supported by the operation on this backend
    #[error("{op}: unsupported dtype {dtype:?}")]
    UnsupportedDType {
        /// Operation name
        op: &'static str,
        /// Offending dtype
        dtype: DType,
    },

    /// DType mismatch between operands
    #[error("dtype mismatch: expected {expected:?}, got {got:?}")]
    DTypeMismatch {
        /// Expected dtype
        expected: DType,
        /// Actual dtype
        got: DType,
    },

    /// Kernel module or pipeline could not be loaded
    #[error("kernel error: {reason}")]
    KernelError {
        /// Description of what went wrong
        reason: String,
    },

    /// The accelerator rejected or faulted during a kernel launch
    #[error("launch of '{kernel}' failed: {reason}")]
    LaunchFailure {
        /// Kernel entry point name
        kernel: String,
        /// Driver-reported reason
        reason: String,
    },

    /// Configuration loading/parsing error
    #[error("config error: {reason}")]
    ConfigError {
        /// Description of what went wrong
        reason: String,
    },
}
