//! ckptmerge CLI - merge two model checkpoints by linear interpolation.

use std::cell::RefCell;
use std::path::PathBuf;

use anyhow::Context;
use ckptmerge_core::Device;
use ckptmerge_merge::{run_merge, AlphaPolicy, MergeConfig, MergeProgress, MergeStage};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ckptmerge")]
#[command(author, version, about = "Merge two model checkpoints", long_about = None)]
struct Cli {
    /// Path to model 0 (base checkpoint)
    model_0: PathBuf,

    /// Path to model 1 (donor checkpoint)
    model_1: PathBuf,

    /// Alpha value, defaults to 0.5
    #[arg(long, allow_negative_numbers = true)]
    alpha: Option<f32>,

    /// Path to the output file
    #[arg(long = "dump_path", visible_alias = "dump-path")]
    dump_path: Option<PathBuf>,

    /// Device to use, defaults to cpu
    #[arg(long, value_parser = parse_device)]
    device: Option<Device>,

    /// Do not merge VAE
    #[arg(long = "without_vae", visible_alias = "without-vae")]
    without_vae: bool,

    /// Reject alpha values outside [0, 1] instead of extrapolating
    #[arg(long = "strict_alpha", visible_alias = "strict-alpha")]
    strict_alpha: bool,

    /// YAML configuration file; flags given on the command line override it
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn parse_device(s: &str) -> Result<Device, String> {
    s.parse::<Device>().map_err(|e| e.to_string())
}

impl Cli {
    /// Resolve flags, the optional YAML file, and defaults into one config.
    fn into_config(self) -> anyhow::Result<MergeConfig> {
        let mut config = match &self.config {
            Some(path) => MergeConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?,
            None => MergeConfig::default(),
        };

        config.model_0 = self.model_0;
        config.model_1 = self.model_1;
        if let Some(alpha) = self.alpha {
            config.alpha = alpha;
        }
        if let Some(dump_path) = self.dump_path {
            config.dump_path = Some(dump_path);
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if self.without_vae {
            config.without_vae = true;
        }
        if self.strict_alpha {
            config.alpha_policy = AlphaPolicy::Interpolate;
        }

        Ok(config)
    }
}

/// Progress bar per merge stage.
#[derive(Default)]
struct StageProgress {
    bar: RefCell<Option<ProgressBar>>,
}

impl MergeProgress for StageProgress {
    fn stage_started(&self, stage: MergeStage, total: usize) {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_prefix(stage.label());
        *self.bar.borrow_mut() = Some(bar);
    }

    fn advance(&self, _stage: MergeStage) {
        if let Some(bar) = self.bar.borrow().as_ref() {
            bar.inc(1);
        }
    }

    fn stage_finished(&self, _stage: MergeStage) {
        if let Some(bar) = self.bar.borrow_mut().take() {
            bar.finish();
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_config()?;

    let progress = StageProgress::default();
    let report = run_merge(&config, &progress).with_context(|| {
        format!(
            "Failed to merge {} and {}",
            config.model_0.display(),
            config.model_1.display()
        )
    })?;

    let summary = report.summary;
    info!(
        "Interpolated {}, passed through {}, skipped {} VAE, adopted {}, dropped {}",
        summary.interpolated,
        summary.passed_through,
        summary.vae_skipped,
        summary.adopted,
        summary.dropped
    );
    if config.without_vae && summary.vae_adopted > 0 {
        warn!(
            "--without_vae kept base VAE tensors, but {} VAE tensors only present in {} were still copied",
            summary.vae_adopted,
            config.model_1.display()
        );
    }

    println!("Done! Merged checkpoint: {}", report.output_path.display());
    Ok(())
}
