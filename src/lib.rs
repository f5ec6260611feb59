#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # IMG.LY Image Classification Pipeline
//!
//! Builds a small labeled image dataset from web search results and fine-tunes a
//! classifier on it.
//!
//! The pipeline runs these stages in order:
//!
//! 1. **Connectivity check**: a TCP probe aborts early when the network is down
//! 2. **Acquisition**: per category, search, download, throttle, then shrink oversized images
//! 3. **Validation**: undecodable files are deleted
//! 4. **Splitting**: deterministic seeded train/validation split, batched loaders
//! 5. **Training**: a softmax head over a frozen backbone, trained for a fixed number of passes
//! 6. **Prediction**: one image is classified with per-class probabilities
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgly_classify::{Pipeline, PipelineConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::builder()
//!     .dataset_root("dataset/bird_or_not")
//!     .categories(["forest", "bird"])
//!     .build()?;
//!
//! let report = Pipeline::new(config)?.run().await?;
//! if let Some(prediction) = report.prediction.prediction() {
//!     println!("{} ({:.2})", prediction.label, prediction.confidence);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Working with images already on disk
//!
//! ```rust,no_run
//! use imgly_classify::{validate_dataset, Dataset};
//!
//! # fn example() -> anyhow::Result<()> {
//! let report = validate_dataset("dataset/bird_or_not")?;
//! println!("removed {} corrupt files", report.removed.len());
//!
//! let dataset = Dataset::from_directory("dataset/bird_or_not")?;
//! let split = dataset.split(0.2, 42)?;
//! println!("{} train / {} valid", split.train.len(), split.valid.len());
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `tract` (default): ONNX feature extractors through the pure Rust Tract runtime
//! - `cli` (default): command-line interface, progress bars and subscriber setup
//! - `webp-support` (default): WebP decoding
//! - `tracing-json`, `tracing-files`: extra log output formats for the CLI

pub mod acquire;
pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod dataset;
pub mod download;
pub mod error;
pub mod learner;
pub mod pipeline;
pub mod predict;
pub mod search;
pub mod services;
pub mod tracing_config;
pub mod utils;
pub mod validate;

// Public API exports
pub use acquire::{AcquisitionReport, AcquisitionState, CategoryAcquisition, DatasetAcquirer};
pub use backends::{backbone_from_spec, Backbone, PooledStatsBackbone};
#[cfg(feature = "tract")]
pub use backends::TractBackbone;
pub use config::{
    BackboneSpec, ConnectivityConfig, PipelineConfig, PipelineConfigBuilder, SafeSearch,
    SearchConfig,
};
pub use connectivity::{AssumeOnline, ConnectivityProbe, TcpProbe};
pub use dataset::{sample_grid, Batch, DataLoader, Dataset, ImageRecord, SplitDataset};
pub use download::{DownloadSummary, ImageDownloader};
pub use error::{PipelineError, PipelineWarning, Result};
pub use learner::{EpochMetrics, Learner, LearnerConfig, Prediction, TrainingReport};
pub use pipeline::{Pipeline, PipelineReport};
pub use predict::{first_image_in, predict_category, predict_file, PredictionOutcome};
pub use search::{provider_from_config, DuckDuckGoSearch, ImageSearchProvider, StaticSearch};
pub use services::{
    ConsoleProgressReporter, ImageIOService, NoOpProgressReporter, PipelineStage,
    ProgressReporter, ProgressTracker, ProgressUpdate,
};
pub use utils::{ImagePreprocessor, PreprocessingOptions};
pub use validate::{require_valid_images, validate_dataset, ValidationReport};

#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
pub use tracing_config::{events, spans, TracingConfig, TracingFormat, TracingGuard, TracingOutput};
