//! Configuration conversion utilities for CLI arguments
//!
//! Precedence: command-line options, then the `--config` file, then defaults.

use crate::cli::main_impl::Cli;
use crate::config::{PipelineConfig, PipelineConfigBuilder};
use anyhow::{Context, Result};

/// Convert CLI arguments to a `PipelineConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the effective configuration
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let base = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        let mut builder = PipelineConfigBuilder::from_config(base);

        if let Some(root) = &cli.dataset_root {
            builder = builder.dataset_root(root);
        }
        if !cli.categories.is_empty() {
            builder = builder.categories(cli.categories.iter().cloned());
        }
        if let Some(count) = cli.images_per_category {
            builder = builder.images_per_category(count);
        }
        if let Some(fraction) = cli.valid_fraction {
            builder = builder.valid_fraction(fraction);
        }
        if let Some(seed) = cli.seed {
            builder = builder.seed(seed);
        }
        if let Some(batch_size) = cli.batch_size {
            builder = builder.batch_size(batch_size);
        }
        if let Some(size) = cli.resize_px {
            builder = builder.resize_px(size);
        }
        if let Some(size) = cli.max_image_size {
            builder = builder.max_image_size(size);
        }
        if let Some(passes) = cli.fine_tune_passes {
            builder = builder.fine_tune_passes(passes);
        }
        if let Some(learning_rate) = cli.learning_rate {
            builder = builder.learning_rate(learning_rate);
        }
        if let Some(secs) = cli.throttle_secs {
            builder = builder.throttle_secs(secs);
        }
        if let Some(category) = &cli.predict_category {
            builder = builder.predict_category(category);
        }
        if cli.resume {
            builder = builder.resume(true);
        }
        #[cfg(feature = "tract")]
        if let Some(path) = &cli.backbone {
            builder = builder.backbone(crate::config::BackboneSpec::Onnx { path: path.clone() });
        }

        Ok(builder.build()?)
    }

    /// Check argument combinations that clap cannot express
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if let Some(path) = &cli.predict {
            if !path.is_file() {
                anyhow::bail!("Prediction image '{}' does not exist", path.display());
            }
        }

        #[cfg(feature = "tract")]
        if let Some(path) = &cli.backbone {
            if !path.is_file() {
                anyhow::bail!("Backbone model '{}' does not exist", path.display());
            }
        }

        if cli.resume && cli.skip_acquisition {
            log::warn!("--resume has no effect together with --skip-acquisition");
        }

        Ok(())
    }
}
