//! Error types for tensor operations.

use thiserror::Error;

use crate::Dtype;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the tensor engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Tensor shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// Data type mismatch.
    #[error("Dtype mismatch: expected {expected}, got {actual}")]
    DtypeMismatch {
        /// Expected dtype.
        expected: Dtype,
        /// Actual dtype.
        actual: Dtype,
    },

    /// Buffer length does not match shape and dtype.
    #[error("Buffer length mismatch for {dtype} tensor of shape {shape:?}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Element dtype.
        dtype: Dtype,
        /// Declared shape.
        shape: Vec<usize>,
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        actual: usize,
    },

    /// Shape whose element or byte count does not fit in `usize`.
    #[error("Shape {shape:?} is too large to address")]
    ShapeOverflow {
        /// Declared shape.
        shape: Vec<usize>,
    },

    /// Unknown or unsupported element type.
    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    /// Compute device not available to this engine.
    #[error("Unsupported device '{0}': only 'cpu' is available")]
    UnsupportedDevice(String),
}
