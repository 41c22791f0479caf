//! Checkpoint merging.
//!
//! The merge runs two sequential passes over a base and a donor checkpoint:
//!
//! 1. **Interpolate**: every base key that is a model parameter and also
//!    exists in the donor becomes `(1 - alpha) * base + alpha * donor`.
//!    VAE keys are left untouched when VAE exclusion is on. All other base
//!    keys pass through unchanged.
//! 2. **Adopt**: every donor key absent from the base is copied into the
//!    result if it is a model parameter, and dropped otherwise. VAE
//!    exclusion is not consulted here, so donor-only VAE keys are adopted
//!    even when exclusion is requested; [`MergeSummary::vae_adopted`]
//!    counts them.
//!
//! The base map is consumed and updated in place. A failed interpolation
//! aborts the whole merge and no partial result is returned.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::{
    is_model_param, is_vae_param, load_weights, save_weights, total_bytes, MergeConfig,
    MergeError, MergeOptions, MergeProgress, MergeStage, NoProgress, Result, WeightMap,
};

/// Merge `donor` into `base` with blend factor `alpha`.
///
/// No validation is applied to `alpha`; use [`Merger`] to enforce an
/// [`AlphaPolicy`](crate::AlphaPolicy). The only error is an interpolation
/// failure between two tensors sharing a key.
pub fn merge(base: WeightMap, donor: &WeightMap, alpha: f32, exclude_vae: bool) -> Result<WeightMap> {
    let options = MergeOptions {
        alpha,
        exclude_vae,
        ..Default::default()
    };
    let outcome = merge_with(base, donor, &options, &NoProgress)?;
    Ok(outcome.weights)
}

/// Per-key decisions taken during a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Base keys combined with the donor.
    pub interpolated: usize,
    /// Base keys copied through unchanged.
    pub passed_through: usize,
    /// Base VAE keys left untouched because of VAE exclusion.
    pub vae_skipped: usize,
    /// Donor-only model keys copied into the result.
    pub adopted: usize,
    /// Adopted keys that are VAE keys while VAE exclusion was requested.
    /// Included in `adopted`.
    pub vae_adopted: usize,
    /// Donor-only keys discarded because they are not model parameters.
    pub dropped: usize,
}

impl MergeSummary {
    /// Number of keys in the merged checkpoint.
    pub fn output_keys(&self) -> usize {
        self.interpolated + self.passed_through + self.vae_skipped + self.adopted
    }
}

/// Merged weights with their summary.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Merged checkpoint.
    pub weights: WeightMap,
    /// What happened to each key.
    pub summary: MergeSummary,
}

/// Two-checkpoint merger with validated options.
#[derive(Debug, Clone)]
pub struct Merger {
    options: MergeOptions,
}

impl Merger {
    /// Create a merger, validating `alpha` against its policy.
    pub fn new(options: MergeOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    /// Merge `donor` into `base`, reporting stage progress.
    pub fn run(
        &self,
        base: WeightMap,
        donor: &WeightMap,
        progress: &dyn MergeProgress,
    ) -> Result<MergeOutcome> {
        info!(
            "Merging {} base tensors with {} donor tensors (alpha = {}, exclude_vae = {})",
            base.len(),
            donor.len(),
            self.options.alpha,
            self.options.exclude_vae
        );

        let outcome = merge_with(base, donor, &self.options, progress)?;

        if outcome.summary.vae_adopted > 0 {
            warn!(
                "{} donor-only VAE tensors were adopted although VAE exclusion is enabled",
                outcome.summary.vae_adopted
            );
        }

        Ok(outcome)
    }
}

fn merge_with(
    mut base: WeightMap,
    donor: &WeightMap,
    options: &MergeOptions,
    progress: &dyn MergeProgress,
) -> Result<MergeOutcome> {
    let mut summary = MergeSummary::default();

    interpolate_shared(&mut base, donor, options, progress, &mut summary)?;
    info!(
        "{}: interpolated {}, passed through {}, skipped {} VAE tensors",
        MergeStage::Interpolate,
        summary.interpolated,
        summary.passed_through,
        summary.vae_skipped
    );

    adopt_donor_only(&mut base, donor, options, progress, &mut summary);
    info!(
        "{}: adopted {} donor-only tensors, dropped {}",
        MergeStage::Adopt,
        summary.adopted,
        summary.dropped
    );

    Ok(MergeOutcome {
        weights: base,
        summary,
    })
}

fn interpolate_shared(
    base: &mut WeightMap,
    donor: &WeightMap,
    options: &MergeOptions,
    progress: &dyn MergeProgress,
    summary: &mut MergeSummary,
) -> Result<()> {
    let stage = MergeStage::Interpolate;
    progress.stage_started(stage, base.len());

    for (name, tensor) in base.iter_mut() {
        if options.exclude_vae && is_vae_param(name) {
            summary.vae_skipped += 1;
        } else {
            match donor.get(name) {
                Some(other) if is_model_param(name) => {
                    *tensor = tensor
                        .lerp(other, options.alpha)
                        .map_err(|source| MergeError::Incompatible {
                            name: name.clone(),
                            source,
                        })?;
                    summary.interpolated += 1;
                }
                _ => summary.passed_through += 1,
            }
        }
        progress.advance(stage);
    }

    progress.stage_finished(stage);
    Ok(())
}

fn adopt_donor_only(
    result: &mut WeightMap,
    donor: &WeightMap,
    options: &MergeOptions,
    progress: &dyn MergeProgress,
    summary: &mut MergeSummary,
) {
    let stage = MergeStage::Adopt;
    progress.stage_started(stage, donor.len());

    for (name, tensor) in donor {
        if !result.contains_key(name) {
            if is_model_param(name) {
                if options.exclude_vae && is_vae_param(name) {
                    summary.vae_adopted += 1;
                }
                debug!("Adopting donor-only tensor {}", name);
                result.insert(name.clone(), tensor.clone());
                summary.adopted += 1;
            } else {
                debug!("Dropping donor-only tensor {}", name);
                summary.dropped += 1;
            }
        }
        progress.advance(stage);
    }

    progress.stage_finished(stage);
}

/// Outcome of [`run_merge`].
#[derive(Debug, Clone)]
pub struct MergeReport {
    /// Where the merged checkpoint was written.
    pub output_path: PathBuf,
    /// What happened to each key.
    pub summary: MergeSummary,
}

/// Main entry point: load both checkpoints, merge, and save the result.
///
/// The output file is written only after the merge has fully succeeded.
pub fn run_merge(config: &MergeConfig, progress: &dyn MergeProgress) -> Result<MergeReport> {
    config.validate()?;
    let merger = Merger::new(config.options())?;

    let base = load_weights(&config.model_0, config.device)?;
    let donor = load_weights(&config.model_1, config.device)?;
    info!(
        "Loaded base ({} tensors, {:.2} GB) and donor ({} tensors, {:.2} GB)",
        base.len(),
        gigabytes(total_bytes(&base)),
        donor.len(),
        gigabytes(total_bytes(&donor))
    );

    let outcome = merger.run(base, &donor, progress)?;
    drop(donor);

    let output_path = config.output_path();
    info!("Saving {} tensors to {:?}", outcome.weights.len(), output_path);
    save_weights(&outcome.weights, &output_path)?;
    info!("Merge complete! Output saved to: {:?}", output_path);

    Ok(MergeReport {
        output_path,
        summary: outcome.summary,
    })
}

fn gigabytes(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

/// Builder for creating merge configurations programmatically.
#[derive(Debug, Default)]
pub struct MergeBuilder {
    config: MergeConfig,
}

impl MergeBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base checkpoint.
    pub fn base(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.model_0 = path.into();
        self
    }

    /// Set the donor checkpoint.
    pub fn donor(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.model_1 = path.into();
        self
    }

    /// Set the blend factor.
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.config.alpha = alpha;
        self
    }

    /// Leave base VAE tensors untouched.
    pub fn without_vae(mut self) -> Self {
        self.config.without_vae = true;
        self
    }

    /// Reject alpha outside `[0, 1]`.
    pub fn strict_alpha(mut self) -> Self {
        self.config.alpha_policy = crate::AlphaPolicy::Interpolate;
        self
    }

    /// Set the output path.
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dump_path = Some(path.into());
        self
    }

    /// Build and validate the merge configuration.
    pub fn build(self) -> Result<MergeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build and run the merge.
    pub fn run(self) -> Result<MergeReport> {
        let config = self.build()?;
        run_merge(&config, &NoProgress)
    }
}
