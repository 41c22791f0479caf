//! Core types for ckptmerge checkpoint merging.
//!
//! This crate provides the foundational pieces shared by the merge library
//! and the command-line tool:
//!
//! - Element types and compute device selection ([`Dtype`], [`Device`])
//! - A dense host-resident [`Tensor`] with element-wise interpolation
//! - Error handling infrastructure

#![warn(missing_docs)]

mod error;
mod tensor;
mod types;

pub use error::*;
pub use tensor::{checked_numel, Tensor};
pub use types::*;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{CoreError, Result};
    pub use crate::tensor::{checked_numel, Tensor};
    pub use crate::types::*;
}
