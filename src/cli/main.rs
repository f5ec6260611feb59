//! Image classification pipeline CLI
//!
//! Downloads a labeled image dataset, cleans it, fine-tunes a classifier head and
//! runs one prediction.

use super::config::CliConfigBuilder;
use crate::{
    dataset::Dataset,
    pipeline::{Pipeline, PipelineReport},
    predict::PredictionOutcome,
    services::ProgressTracker,
    tracing_config::{init_cli_tracing, TracingGuard, TracingOutput},
};
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;

/// Number of files listed by `--inspect`
const INSPECT_PREVIEW: usize = 5;

/// Image dataset builder and classifier trainer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "imgly-classify")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// JSON configuration file; command-line options override its values
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding one subdirectory per category
    #[arg(long, value_name = "DIR")]
    pub dataset_root: Option<PathBuf>,

    /// Category to download and classify (repeat for several)
    #[arg(long = "category", value_name = "NAME")]
    pub categories: Vec<String>,

    /// Maximum search results per category
    #[arg(long)]
    pub images_per_category: Option<usize>,

    /// Fraction of images held out for validation
    #[arg(long)]
    pub valid_fraction: Option<f64>,

    /// Seed for the split and training shuffles
    #[arg(long)]
    pub seed: Option<u64>,

    /// Images per training batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Square size images are squished to for training
    #[arg(long = "resize", value_name = "PX")]
    pub resize_px: Option<u32>,

    /// Downloaded images are shrunk to fit this size
    #[arg(long, value_name = "PX")]
    pub max_image_size: Option<u32>,

    /// Number of fine-tuning passes
    #[arg(long = "passes")]
    pub fine_tune_passes: Option<usize>,

    /// SGD learning rate for the classifier head
    #[arg(long)]
    pub learning_rate: Option<f32>,

    /// Pause after each category's downloads (seconds)
    #[arg(long)]
    pub throttle_secs: Option<u64>,

    /// Category whose first image is classified at the end
    #[arg(long)]
    pub predict_category: Option<String>,

    /// Classify this file at the end instead
    #[arg(long, value_name = "FILE")]
    pub predict: Option<PathBuf>,

    /// Use the images already on disk
    #[arg(long)]
    pub skip_acquisition: bool,

    /// Skip categories completed by an earlier run
    #[arg(long)]
    pub resume: bool,

    /// ONNX feature extractor to use instead of the built-in statistics backbone
    #[cfg(feature = "tract")]
    #[arg(long, value_name = "ONNX")]
    pub backbone: Option<PathBuf>,

    /// Write a PNG contact sheet of training images
    #[arg(long, value_name = "PNG")]
    pub sample_grid: Option<PathBuf>,

    /// List the dataset on disk and exit
    #[arg(long)]
    pub inspect: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    pub show_config: bool,

    /// Also write logs to this file
    #[cfg(feature = "tracing-files")]
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _tracing_guard = init_tracing(&cli).context("Failed to initialize tracing")?;

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    if cli.show_config {
        println!("{}", config.to_json_pretty()?);
        return Ok(());
    }

    if cli.inspect {
        return inspect_dataset(&config.dataset_root);
    }

    info!("Starting imgly-classify");
    info!("Dataset root: {}", config.dataset_root.display());
    info!("Categories: {}", config.categories.join(", "));
    info!("Backbone: {}", config.backbone);

    let mut pipeline = Pipeline::new(config)
        .context("Failed to set up pipeline")?
        .with_progress_tracker(ProgressTracker::console(cli.verbose > 0))
        .skip_acquisition(cli.skip_acquisition)
        .show_progress(!cli.no_progress);
    if let Some(path) = &cli.predict {
        pipeline = pipeline.predict_file(path);
    }
    if let Some(path) = &cli.sample_grid {
        pipeline = pipeline.sample_grid(path);
    }

    let report = pipeline.run().await?;
    print_summary(&report);
    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<TracingGuard> {
    #[cfg(feature = "tracing-files")]
    let output = match &cli.log_file {
        Some(path) => TracingOutput::Both(path.clone()),
        None => TracingOutput::Console,
    };
    #[cfg(not(feature = "tracing-files"))]
    let output = TracingOutput::Console;

    init_cli_tracing(cli.verbose, output)
}

fn inspect_dataset(root: &std::path::Path) -> Result<()> {
    let dataset = Dataset::from_directory(root)
        .with_context(|| format!("Failed to scan {}", root.display()))?;

    println!("Total images: {}", dataset.len());
    for record in dataset.records().iter().take(INSPECT_PREVIEW) {
        println!("  {} -> {}", record.path.display(), record.label);
    }
    for (label, count) in dataset.summary() {
        println!("{label}: {count}");
    }
    Ok(())
}

fn print_summary(report: &PipelineReport) {
    for line in summary_lines(report) {
        println!("{line}");
    }
}

fn summary_lines(report: &PipelineReport) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(acquisition) = &report.acquisition {
        for category in &acquisition.categories {
            if category.skipped {
                lines.push(format!("{}: skipped (already acquired)", category.category));
            } else {
                lines.push(format!(
                    "{}: {} found, {} downloaded, {} failed, {} resized",
                    category.category,
                    category.found,
                    category.downloaded,
                    category.failed,
                    category.resized
                ));
            }
        }
        lines.push(format!(
            "Acquisition: {} downloaded, {} failed",
            acquisition.total_downloaded(),
            acquisition.total_failed()
        ));
    }

    lines.push(format!(
        "Validation: {} valid, {} removed, {} in category directories",
        report.validation.valid.len(),
        report.validation.removed.len(),
        report.labeled_images()
    ));
    lines.push(format!(
        "Split: {} train, {} validation",
        report.train_size, report.valid_size
    ));

    for epoch in &report.training.epochs {
        match (epoch.valid_loss, epoch.error_rate) {
            (Some(valid_loss), Some(error_rate)) => lines.push(format!(
                "epoch {}: train_loss {:.4}  valid_loss {:.4}  error_rate {:.4}",
                epoch.epoch, epoch.train_loss, valid_loss, error_rate
            )),
            _ => lines.push(format!("epoch {}: train_loss {:.4}", epoch.epoch, epoch.train_loss)),
        }
    }

    match &report.prediction {
        PredictionOutcome::Predicted { path, prediction } => lines.push(format!(
            "Prediction for {}: {} (confidence {:.4})",
            path.display(),
            prediction.label,
            prediction.confidence
        )),
        PredictionOutcome::Unavailable { category } => {
            lines.push(format!("No {category} images found for prediction."));
        },
    }

    if !report.warnings.is_empty() {
        lines.push(format!(
            "{} warnings (rerun with -v for details)",
            report.warnings.len()
        ));
    }
    lines
}
