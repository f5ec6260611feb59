//! Progress reporting service
//!
//! This module separates progress reporting concerns from the pipeline stages,
//! allowing different frontends to implement their own progress handling.

use crate::error::PipelineWarning;
use instant::Instant;

/// Stages of a pipeline run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Probing network reachability
    ConnectivityCheck,
    /// Searching, downloading and resizing images
    Acquisition,
    /// Removing undecodable images
    Validation,
    /// Partitioning into train and validation sets
    Splitting,
    /// Fine-tuning the classifier head
    Training,
    /// Running the final prediction
    Prediction,
    /// Run finished
    Completed,
}

impl PipelineStage {
    /// Get a human-readable description of the stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            PipelineStage::ConnectivityCheck => "Checking internet connectivity",
            PipelineStage::Acquisition => "Downloading images",
            PipelineStage::Validation => "Verifying images",
            PipelineStage::Splitting => "Splitting dataset",
            PipelineStage::Training => "Training model",
            PipelineStage::Prediction => "Making a prediction",
            PipelineStage::Completed => "Pipeline completed",
        }
    }

    /// Get the nominal progress percentage at the start of this stage
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            PipelineStage::ConnectivityCheck => 0,
            PipelineStage::Acquisition => 5,
            PipelineStage::Validation => 50,
            PipelineStage::Splitting => 55,
            PipelineStage::Training => 60,
            PipelineStage::Prediction => 95,
            PipelineStage::Completed => 100,
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current stage
    pub stage: PipelineStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since the run started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    /// Create a new progress update
    #[must_use]
    pub fn new(stage: PipelineStage, start_time: Instant) -> Self {
        Self::with_description(stage, stage.description().to_string(), start_time)
    }

    /// Create a progress update with custom description
    #[must_use]
    pub fn with_description(stage: PipelineStage, description: String, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
            description,
        }
    }
}

/// Trait for reporting progress during a pipeline run
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report a recoverable condition
    fn report_warning(&self, stage: PipelineStage, warning: &PipelineWarning);

    /// Report a fatal error
    fn report_error(&self, stage: PipelineStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_warning(&self, _stage: PipelineStage, _warning: &PipelineWarning) {}

    fn report_error(&self, _stage: PipelineStage, _error: &str) {}
}

/// Console progress reporter that logs progress through the `log` facade
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `verbose` - Whether to include elapsed time in every update
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_warning(&self, stage: PipelineStage, warning: &PipelineWarning) {
        match warning {
            // Individual download failures are expected and only interesting when debugging
            PipelineWarning::DownloadFailed { .. } => log::debug!("{}", warning),
            _ => log::warn!("⚠️  {} ({})", warning, stage.description()),
        }
    }

    fn report_error(&self, stage: PipelineStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }
}

/// Progress tracker that manages timing and progress reporting
pub struct ProgressTracker {
    reporter: Box<dyn ProgressReporter>,
    start_time: Instant,
    current_stage: Option<PipelineStage>,
}

impl ProgressTracker {
    /// Create a new progress tracker with the specified reporter
    #[must_use]
    pub fn new(reporter: Box<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    /// Create a progress tracker with no-op reporter (for testing/disabled progress)
    #[must_use]
    pub fn no_op() -> Self {
        Self::new(Box::new(NoOpProgressReporter))
    }

    /// Create a progress tracker with console reporter
    #[must_use]
    pub fn console(verbose: bool) -> Self {
        Self::new(Box::new(ConsoleProgressReporter::new(verbose)))
    }

    /// Report progress for a specific stage
    pub fn report_stage(&mut self, stage: PipelineStage) {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    /// Report progress with custom description
    pub fn report_stage_with_description(&mut self, stage: PipelineStage, description: String) {
        self.current_stage = Some(stage);
        self.reporter.report_progress(ProgressUpdate::with_description(
            stage,
            description,
            self.start_time,
        ));
    }

    /// Report warnings against the current stage
    pub fn report_warnings(&self, warnings: &[PipelineWarning]) {
        let stage = self.current_stage.unwrap_or(PipelineStage::ConnectivityCheck);
        for warning in warnings {
            self.reporter.report_warning(stage, warning);
        }
    }

    /// Report an error during processing
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(PipelineStage::ConnectivityCheck);
        self.reporter.report_error(stage, error);
    }

    /// Get the elapsed time since tracking started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Get the current stage
    #[must_use]
    pub fn current_stage(&self) -> Option<PipelineStage> {
        self.current_stage
    }
}
