//! Dataset acquisition: search, download, throttle and resize per category
//!
//! Categories are processed strictly in configured order. Per-file failures are
//! collected as warnings; only search provider failures and file system errors on
//! the dataset root abort the run.

use crate::config::PipelineConfig;
use crate::download::{ImageDownloader, ProgressIndicator};
use crate::error::{PipelineError, PipelineWarning, Result};
use crate::search::ImageSearchProvider;
use crate::services::ImageIOService;
use crate::tracing_config::spans;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Instrument;

/// Name of the resume state file inside the dataset root
pub const STATE_FILE_NAME: &str = ".acquisition.json";

/// Completion record for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryState {
    pub completed_at: DateTime<Utc>,
    pub downloaded: usize,
}

/// Which categories have been fully acquired
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionState {
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryState>,
}

impl AcquisitionState {
    #[must_use]
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(STATE_FILE_NAME)
    }

    /// Load the state stored under `root`, or an empty state if there is none
    ///
    /// An unreadable state file is logged and ignored, which means every
    /// category is acquired again.
    #[must_use]
    pub fn load(root: &Path) -> Self {
        let path = Self::path_in(root);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Self::default();
        };

        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                log::warn!("Ignoring unreadable acquisition state {}: {}", path.display(), e);
                Self::default()
            },
        }
    }

    /// Persist the state under `root`
    ///
    /// # Errors
    /// - Serialization or write failure
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path_in(root);
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            PipelineError::internal(format!("Failed to serialize acquisition state: {}", e))
        })?;
        std::fs::write(&path, json)
            .map_err(|e| PipelineError::file_io_error("write acquisition state", &path, &e))
    }

    #[must_use]
    pub fn is_complete(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }

    pub fn mark_complete(&mut self, category: &str, downloaded: usize) {
        self.categories.insert(
            category.to_string(),
            CategoryState {
                completed_at: Utc::now(),
                downloaded,
            },
        );
    }
}

/// Counts for one category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryAcquisition {
    pub category: String,
    /// URLs returned by the search provider
    pub found: usize,
    /// Files written
    pub downloaded: usize,
    /// URLs that could not be fetched
    pub failed: usize,
    /// Files shrunk to the size limit
    pub resized: usize,
    /// Skipped because it was already acquired in an earlier run
    pub skipped: bool,
}

/// Outcome of acquiring every category
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionReport {
    pub categories: Vec<CategoryAcquisition>,
    pub warnings: Vec<PipelineWarning>,
}

impl AcquisitionReport {
    #[must_use]
    pub fn total_downloaded(&self) -> usize {
        self.categories.iter().map(|c| c.downloaded).sum()
    }

    #[must_use]
    pub fn total_failed(&self) -> usize {
        self.categories.iter().map(|c| c.failed).sum()
    }

    #[must_use]
    pub fn category(&self, name: &str) -> Option<&CategoryAcquisition> {
        self.categories.iter().find(|c| c.category == name)
    }
}

/// Builds the on-disk dataset from search results
pub struct DatasetAcquirer {
    search: Box<dyn ImageSearchProvider>,
    downloader: ImageDownloader,
    config: PipelineConfig,
    show_progress: bool,
}

impl DatasetAcquirer {
    /// Create an acquirer for the configured categories
    ///
    /// # Errors
    /// - Failed to create the HTTP client
    pub fn new(config: &PipelineConfig, search: Box<dyn ImageSearchProvider>) -> Result<Self> {
        Ok(Self {
            search,
            downloader: ImageDownloader::new(Duration::from_secs(config.download_timeout_secs))?,
            config: config.clone(),
            show_progress: false,
        })
    }

    /// Show an indicatif bar over the category loop (no-op without the `cli` feature)
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Acquire every category in order
    ///
    /// # Errors
    /// - A category directory cannot be created
    /// - The search provider fails
    /// - The resume state cannot be written
    pub async fn acquire(&self) -> Result<AcquisitionReport> {
        let mut report = AcquisitionReport::default();
        let root = &self.config.dataset_root;
        let mut state = if self.config.resume {
            AcquisitionState::load(root)
        } else {
            AcquisitionState::default()
        };

        let progress = if self.show_progress {
            ProgressIndicator::new_bar(self.config.categories.len() as u64, "Acquiring")
        } else {
            ProgressIndicator::NoOp
        };

        for category in &self.config.categories {
            progress.set_message(category.clone());

            let outcome = self
                .acquire_category(category, &state, &mut report.warnings)
                .instrument(spans::category(category))
                .await?;

            if outcome.downloaded > 0 {
                state.mark_complete(category, outcome.downloaded);
                state.save(root)?;
            }

            report.categories.push(outcome);
            progress.inc();
        }

        progress.finish_with_message(format!(
            "{} images downloaded",
            report.total_downloaded()
        ));
        Ok(report)
    }

    async fn acquire_category(
        &self,
        category: &str,
        state: &AcquisitionState,
        warnings: &mut Vec<PipelineWarning>,
    ) -> Result<CategoryAcquisition> {
        let dir = self.config.dataset_root.join(category);
        std::fs::create_dir_all(&dir)
            .map_err(|e| PipelineError::file_io_error("create category directory", &dir, &e))?;

        let mut outcome = CategoryAcquisition {
            category: category.to_string(),
            ..CategoryAcquisition::default()
        };

        if self.config.resume && state.is_complete(category) {
            log::info!("⏭️  '{}' already acquired, skipping", category);
            outcome.skipped = true;
            return Ok(outcome);
        }

        let term = self.config.query_for(category);
        log::info!("🔎 Searching {} for '{}'", self.search.name(), term);
        let urls = self.search.search(&term, self.config.images_per_category).await?;
        outcome.found = urls.len();

        if urls.is_empty() {
            let warning = PipelineWarning::EmptySearchResult {
                category: category.to_string(),
            };
            warnings.push(warning);
            return Ok(outcome);
        }

        let summary = self.downloader.download_images(&dir, &urls, None).await?;
        outcome.downloaded = summary.saved.len();
        outcome.failed = summary.failures.len();
        warnings.extend(
            summary
                .failures
                .into_iter()
                .map(|(url, reason)| PipelineWarning::DownloadFailed { url, reason }),
        );
        log::info!(
            "📥 '{}': {} of {} images downloaded",
            category,
            outcome.downloaded,
            outcome.found
        );

        let throttle = self.config.throttle();
        if !throttle.is_zero() {
            log::debug!("Sleeping {:?} before the next category", throttle);
            tokio::time::sleep(throttle).await;
        }

        let resize = ImageIOService::resize_directory(&dir, self.config.max_image_size)?;
        outcome.resized = resize.resized;
        warnings.extend(resize.failed.into_iter().map(|(path, reason)| {
            log::debug!("Could not resize {}: {}", path.display(), reason);
            PipelineWarning::ResizeFailed { path, reason }
        }));

        Ok(outcome)
    }
}
