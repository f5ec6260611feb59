//! End-to-end orchestration
//!
//! Stages run strictly in order: connectivity check, acquisition, validation,
//! split, training, prediction. Any `PipelineError` stops the run at the stage
//! that raised it; warnings are gathered into the final report.

use crate::acquire::{AcquisitionReport, DatasetAcquirer};
use crate::backends::{backbone_from_spec, Backbone};
use crate::config::PipelineConfig;
use crate::connectivity::{ConnectivityProbe, TcpProbe};
use crate::dataset::{sample_grid, DataLoader, Dataset};
use crate::error::{PipelineError, PipelineWarning, Result};
use crate::learner::{Learner, LearnerConfig, TrainingReport};
use crate::predict::{predict_category, predict_file, PredictionOutcome};
use crate::search::{provider_from_config, ImageSearchProvider};
use crate::services::{ImageIOService, PipelineStage, ProgressTracker};
use crate::tracing_config::{events, spans};
use crate::validate::{require_valid_images, ValidationReport};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Instrument;

/// Images shown in a sample grid
const SAMPLE_GRID_IMAGES: usize = 6;
/// Tile side of a sample grid
const SAMPLE_GRID_TILE_PX: u32 = 128;

/// Everything a completed run produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// `None` when acquisition was skipped
    pub acquisition: Option<AcquisitionReport>,
    pub validation: ValidationReport,
    /// Valid images per label
    pub dataset_summary: BTreeMap<String, usize>,
    pub train_size: usize,
    pub valid_size: usize,
    pub training: TrainingReport,
    pub prediction: PredictionOutcome,
    /// Recoverable conditions from every stage, in the order they occurred
    pub warnings: Vec<PipelineWarning>,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    /// Valid images that sit in a category directory and so took part in the split
    #[must_use]
    pub fn labeled_images(&self) -> usize {
        self.dataset_summary.values().sum()
    }
}

/// A configured pipeline run with injectable seams
pub struct Pipeline {
    config: PipelineConfig,
    probe: Box<dyn ConnectivityProbe>,
    search: Option<Box<dyn ImageSearchProvider>>,
    backbone: Option<Box<dyn Backbone>>,
    tracker: ProgressTracker,
    skip_acquisition: bool,
    show_progress: bool,
    predict_path: Option<PathBuf>,
    sample_grid_path: Option<PathBuf>,
}

impl Pipeline {
    /// Create a pipeline with the probe, search provider and backbone named by `config`
    ///
    /// # Errors
    /// - The configuration is invalid
    /// - The search provider or backbone cannot be constructed
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let probe = Box::new(TcpProbe::from_config(&config.connectivity));
        let search = provider_from_config(
            &config.search,
            Duration::from_secs(config.download_timeout_secs),
        )?;
        let backbone = backbone_from_spec(&config.backbone, config.resize_px)?;

        Ok(Self {
            config,
            probe,
            search: Some(search),
            backbone: Some(backbone),
            tracker: ProgressTracker::no_op(),
            skip_acquisition: false,
            show_progress: false,
            predict_path: None,
            sample_grid_path: None,
        })
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Box<dyn ConnectivityProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_search(mut self, search: Box<dyn ImageSearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    #[must_use]
    pub fn with_backbone(mut self, backbone: Box<dyn Backbone>) -> Self {
        self.backbone = Some(backbone);
        self
    }

    #[must_use]
    pub fn with_progress_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Train on what is already on disk instead of downloading
    #[must_use]
    pub fn skip_acquisition(mut self, skip: bool) -> Self {
        self.skip_acquisition = skip;
        self
    }

    /// Show download progress bars (CLI builds only)
    #[must_use]
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Predict this file instead of the first image of the prediction category
    #[must_use]
    pub fn predict_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.predict_path = Some(path.into());
        self
    }

    /// Write a contact sheet of training images to this PNG path
    #[must_use]
    pub fn sample_grid<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.sample_grid_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage
    ///
    /// # Errors
    /// - Any fatal condition; see [`PipelineError`]
    pub async fn run(mut self) -> Result<PipelineReport> {
        let result = self.run_stages().await;
        if let Err(e) = &result {
            self.tracker.report_error(&e.to_string());
        }
        result
    }

    async fn run_stages(&mut self) -> Result<PipelineReport> {
        let mut warnings = Vec::new();
        let root = self.config.dataset_root.clone();

        let acquisition = if self.skip_acquisition {
            log::info!("⏭️  Skipping acquisition, using images under {}", root.display());
            None
        } else {
            self.tracker.report_stage(PipelineStage::ConnectivityCheck);
            self.probe
                .check()
                .instrument(spans::stage("connectivity"))
                .await?;

            std::fs::create_dir_all(&root)
                .map_err(|e| PipelineError::file_io_error("create dataset root", &root, &e))?;

            self.tracker.report_stage(PipelineStage::Acquisition);
            let search = self
                .search
                .take()
                .ok_or_else(|| PipelineError::internal("Search provider already consumed"))?;
            let acquirer = DatasetAcquirer::new(&self.config, search)?.with_progress(self.show_progress);
            let report = acquirer
                .acquire()
                .instrument(spans::stage("acquisition"))
                .await?;

            self.tracker.report_warnings(&report.warnings);
            warnings.extend(report.warnings.iter().cloned());
            Some(report)
        };

        let validation = {
            let _span = spans::stage("validation").entered();
            self.tracker.report_stage(PipelineStage::Validation);
            let validation = require_valid_images(&root)?;
            let removed = validation.warnings();
            self.tracker.report_warnings(&removed);
            warnings.extend(removed);
            validation
        };

        let (dataset, split) = {
            let _span = spans::stage("split").entered();
            self.tracker.report_stage(PipelineStage::Splitting);
            let dataset = Dataset::from_paths(&root, &validation.valid);
            if dataset.is_empty() {
                return Err(PipelineError::NoValidImages { root });
            }
            let split = dataset.split(self.config.valid_fraction, self.config.seed)?;
            log::info!(
                "🗂️  {} images in {} classes: {} train, {} validation",
                dataset.len(),
                dataset.classes().len(),
                split.train.len(),
                split.valid.len()
            );
            split.ensure_trainable()?;
            if split.valid.is_empty() {
                events::warning_with_recommendation(
                    "No images were assigned to validation; only training loss will be reported",
                    "download more images per category or raise valid_fraction",
                );
            }

            if let Some(path) = &self.sample_grid_path {
                let grid = sample_grid(&split.train, SAMPLE_GRID_IMAGES, SAMPLE_GRID_TILE_PX)?;
                ImageIOService::save_image(&image::DynamicImage::ImageRgb8(grid), path)?;
                log::info!("🖼️  Sample grid written to {}", path.display());
            }
            (dataset, split)
        };

        let train_size = split.train.len();
        let valid_size = split.valid.len();
        let train_loader =
            DataLoader::new(split.train, &split.classes, self.config.batch_size, self.config.resize_px)?;
        let valid_loader =
            DataLoader::new(split.valid, &split.classes, self.config.batch_size, self.config.resize_px)?;

        self.tracker.report_stage_with_description(
            PipelineStage::Training,
            format!(
                "Training {} passes on {} images",
                self.config.fine_tune_passes, train_size
            ),
        );
        let backbone = self
            .backbone
            .take()
            .ok_or_else(|| PipelineError::internal("Backbone already consumed"))?;
        let mut learner = Learner::new(backbone, split.classes, LearnerConfig::from(&self.config))?;
        let training =
            learner.fine_tune(&train_loader, &valid_loader, self.config.fine_tune_passes)?;

        self.tracker.report_stage(PipelineStage::Prediction);
        let prediction = {
            let _span = spans::stage("prediction").entered();
            match &self.predict_path {
                Some(path) => predict_file(&mut learner, path)?,
                None => {
                    let (outcome, warning) =
                        predict_category(&mut learner, &root, &self.config.predict_category)?;
                    if let Some(warning) = warning {
                        self.tracker.report_warnings(std::slice::from_ref(&warning));
                        warnings.push(warning);
                    }
                    outcome
                },
            }
        };

        self.tracker.report_stage(PipelineStage::Completed);

        Ok(PipelineReport {
            acquisition,
            validation,
            dataset_summary: dataset.summary(),
            train_size,
            valid_size,
            training,
            prediction,
            warnings,
            elapsed_ms: self.tracker.elapsed_ms(),
        })
    }
}
