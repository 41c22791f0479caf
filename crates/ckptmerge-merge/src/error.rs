//! Error types for checkpoint merging operations.

use ckptmerge_core::CoreError;
use thiserror::Error;

/// Errors that can occur while loading, merging, or saving checkpoints.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Checkpoint content could not be decoded.
    #[error("Failed to load checkpoint: {0}")]
    ModelLoad(String),

    /// Checkpoint could not be encoded in the requested container.
    #[error("Failed to save checkpoint: {0}")]
    ModelSave(String),

    /// Two tensors under the same key could not be combined.
    #[error("Cannot merge tensor '{name}': {source}")]
    Incompatible {
        /// Tensor name.
        name: String,
        /// Underlying arithmetic failure.
        #[source]
        source: CoreError,
    },

    /// Invalid merge configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Tensor engine error.
    #[error("Tensor error: {0}")]
    Tensor(#[from] CoreError),

    /// Safetensors error.
    #[error("Safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;
