//! Key predicates that decide which tensors take part in a merge.
//!
//! Both predicates are plain, case-sensitive substring tests on the
//! parameter name. They carry no architecture knowledge.

/// Substring marking a tensor as a mergeable model parameter.
pub const MODEL_MARKER: &str = "model";

/// Substring marking a tensor as part of the VAE sub-tree.
pub const VAE_MARKER: &str = "first_stage_model";

/// True iff `key` names a model parameter eligible for merging or adoption.
pub fn is_model_param(key: &str) -> bool {
    key.contains(MODEL_MARKER)
}

/// True iff `key` belongs to the variational autoencoder.
///
/// Every VAE key is also a model parameter, since the VAE marker contains
/// the model marker.
pub fn is_vae_param(key: &str) -> bool {
    key.contains(VAE_MARKER)
}
