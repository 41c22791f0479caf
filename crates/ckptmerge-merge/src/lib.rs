//! Checkpoint merging by parameter-wise linear interpolation.
//!
//! This crate combines a base and a donor checkpoint into one checkpoint
//! that can replace either source model:
//!
//! - Model parameters present in both are blended as
//!   `(1 - alpha) * base + alpha * donor`
//! - Model parameters only the donor has are adopted as-is
//! - The VAE sub-tree (`first_stage_model`) can be excluded from blending
//!
//! Checkpoints are read from and written to safetensors files or JSON
//! state-dict documents, selected by file extension.
//!
//! # Example
//!
//! ```ignore
//! use ckptmerge_merge::{run_merge, MergeConfig, NoProgress};
//!
//! let config = MergeConfig {
//!     model_0: "anything-v3.safetensors".into(),
//!     model_1: "waifu-diffusion.safetensors".into(),
//!     alpha: 0.3,
//!     without_vae: true,
//!     ..Default::default()
//! };
//!
//! let report = run_merge(&config, &NoProgress)?;
//! println!("wrote {:?}", report.output_path);
//! ```

#![warn(missing_docs)]

mod codec;
mod config;
mod error;
mod keys;
mod merge;
mod progress;
mod weights;

pub use codec::*;
pub use config::*;
pub use error::*;
pub use keys::*;
pub use merge::*;
pub use progress::*;
pub use weights::*;
