//! Supporting services shared by the pipeline stages

pub mod io;
pub mod progress;

pub use io::{ImageIOService, ResizeSummary, IMAGE_EXTENSIONS};
pub use progress::{
    ConsoleProgressReporter, NoOpProgressReporter, PipelineStage, ProgressReporter,
    ProgressTracker, ProgressUpdate,
};
