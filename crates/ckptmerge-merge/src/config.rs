//! Configuration types for checkpoint merging.

use std::path::{Path, PathBuf};

use ckptmerge_core::Device;
use serde::{Deserialize, Serialize};

use crate::{MergeError, Result};

/// How the blend factor is checked before a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlphaPolicy {
    /// Accept any finite alpha. Values outside `[0, 1]` extrapolate past
    /// one of the two checkpoints.
    #[default]
    Extrapolate,
    /// Reject alpha outside `[0, 1]`.
    Interpolate,
}

/// Parameters of a single two-checkpoint merge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Blend factor: weight of the donor checkpoint.
    #[serde(default = "default_alpha")]
    pub alpha: f32,

    /// Leave VAE tensors present in the base untouched.
    #[serde(default)]
    pub exclude_vae: bool,

    /// How `alpha` is validated.
    #[serde(default)]
    pub alpha_policy: AlphaPolicy,
}

fn default_alpha() -> f32 {
    0.5
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            exclude_vae: false,
            alpha_policy: AlphaPolicy::default(),
        }
    }
}

impl MergeOptions {
    /// Validate the blend factor against the alpha policy.
    ///
    /// Non-finite values are rejected under every policy.
    pub fn validate(&self) -> Result<()> {
        if !self.alpha.is_finite() {
            return Err(MergeError::InvalidConfig(format!(
                "alpha must be finite, got {}",
                self.alpha
            )));
        }

        if self.alpha_policy == AlphaPolicy::Interpolate && !(0.0..=1.0).contains(&self.alpha) {
            return Err(MergeError::InvalidConfig(format!(
                "alpha must lie in [0, 1] under the interpolate policy, got {}",
                self.alpha
            )));
        }

        Ok(())
    }
}

/// Complete merge configuration, built from CLI flags or loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Base checkpoint path.
    #[serde(default)]
    pub model_0: PathBuf,

    /// Donor checkpoint path.
    #[serde(default)]
    pub model_1: PathBuf,

    /// Blend factor applied to the donor.
    #[serde(default = "default_alpha")]
    pub alpha: f32,

    /// Output path. Derived from the input names when absent.
    #[serde(default)]
    pub dump_path: Option<PathBuf>,

    /// Device tensors are loaded onto.
    #[serde(default)]
    pub device: Device,

    /// Skip VAE tensors during interpolation.
    #[serde(default)]
    pub without_vae: bool,

    /// How `alpha` is validated.
    #[serde(default)]
    pub alpha_policy: AlphaPolicy,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            model_0: PathBuf::new(),
            model_1: PathBuf::new(),
            alpha: default_alpha(),
            dump_path: None,
            device: Device::default(),
            without_vae: false,
            alpha_policy: AlphaPolicy::default(),
        }
    }
}

impl MergeConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Merge options derived from this configuration.
    pub fn options(&self) -> MergeOptions {
        MergeOptions {
            alpha: self.alpha,
            exclude_vae: self.without_vae,
            alpha_policy: self.alpha_policy,
        }
    }

    /// Where the merged checkpoint is written.
    pub fn output_path(&self) -> PathBuf {
        match &self.dump_path {
            Some(path) => path.clone(),
            None => default_output_path(&self.model_0, &self.model_1),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.model_0.as_os_str().is_empty() {
            return Err(MergeError::InvalidConfig(
                "base checkpoint path (model_0) is required".to_string(),
            ));
        }
        if self.model_1.as_os_str().is_empty() {
            return Err(MergeError::InvalidConfig(
                "donor checkpoint path (model_1) is required".to_string(),
            ));
        }

        self.options().validate()
    }
}

/// `<dir of model_0>/<name of model_0>_<name of model_1>.safetensors`.
///
/// File names keep their extensions, so `a.ckpt` and `b.safetensors`
/// give `a.ckpt_b.safetensors.safetensors`.
pub fn default_output_path(model_0: &Path, model_1: &Path) -> PathBuf {
    let merged_name = format!("{}_{}.safetensors", file_name(model_0), file_name(model_1));
    match model_0.parent() {
        Some(dir) => dir.join(merged_name),
        None => PathBuf::from(merged_name),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
model_0: models/anything.ckpt
model_1: models/waifu.safetensors
alpha: 0.3
dump_path: out/merged.safetensors
device: cpu
without_vae: true
alpha_policy: interpolate
"#;

        let config = MergeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.model_0, PathBuf::from("models/anything.ckpt"));
        assert_eq!(config.alpha, 0.3);
        assert!(config.without_vae);
        assert_eq!(config.alpha_policy, AlphaPolicy::Interpolate);
        assert_eq!(config.output_path(), PathBuf::from("out/merged.safetensors"));
    }

    #[test]
    fn test_parse_defaults() {
        let config = MergeConfig::from_yaml("model_0: a.ckpt\nmodel_1: b.ckpt\n").unwrap();
        assert_eq!(config.alpha, 0.5);
        assert_eq!(config.device, Device::Cpu);
        assert!(!config.without_vae);
        assert_eq!(config.alpha_policy, AlphaPolicy::Extrapolate);
        assert!(config.dump_path.is_none());
    }

    #[test]
    fn test_unknown_device_rejected() {
        let result = MergeConfig::from_yaml("model_0: a\nmodel_1: b\ndevice: cuda\n");
        assert!(matches!(result, Err(MergeError::Yaml(_))));
    }

    #[test]
    fn test_default_output_path() {
        let path = default_output_path(Path::new("/ckpt/a.ckpt"), Path::new("/other/b.safetensors"));
        assert_eq!(path, PathBuf::from("/ckpt/a.ckpt_b.safetensors.safetensors"));

        let path = default_output_path(Path::new("a.ckpt"), Path::new("b.ckpt"));
        assert_eq!(path, PathBuf::from("a.ckpt_b.ckpt.safetensors"));
    }

    #[test]
    fn test_options_from_config() {
        let config = MergeConfig {
            alpha: 0.8,
            without_vae: true,
            ..Default::default()
        };

        let options = config.options();
        assert_eq!(options.alpha, 0.8);
        assert!(options.exclude_vae);
    }

    #[test]
    fn test_validate_requires_paths() {
        let config = MergeConfig::default();
        assert!(matches!(config.validate(), Err(MergeError::InvalidConfig(_))));

        let config = MergeConfig {
            model_0: "a".into(),
            model_1: "b".into(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_extrapolate_policy_accepts_out_of_range() {
        let options = MergeOptions {
            alpha: 1.5,
            ..Default::default()
        };
        assert!(options.validate().is_ok());

        let options = MergeOptions {
            alpha: -0.25,
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_interpolate_policy_rejects_out_of_range() {
        let mut options = MergeOptions {
            alpha: 1.5,
            alpha_policy: AlphaPolicy::Interpolate,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        options.alpha = 1.0;
        assert!(options.validate().is_ok());
        options.alpha = 0.0;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_non_finite_alpha_rejected() {
        for alpha in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let options = MergeOptions {
                alpha,
                ..Default::default()
            };
            assert!(options.validate().is_err());
        }
    }
}
