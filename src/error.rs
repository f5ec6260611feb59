//! Error and warning types for the dataset and training pipeline
//!
//! Fatal conditions are `PipelineError` values propagated with `?`; recoverable
//! conditions are `PipelineWarning` values collected into stage reports.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Fatal errors that abort a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// The connectivity probe could not reach its target
    #[error("No internet connection: could not reach {address} ({reason}). Check your connection and try again.")]
    NoConnectivity { address: String, reason: String },

    /// HTTP transport errors
    #[error("Network error: {0}")]
    Network(String),

    /// Image search provider errors
    #[error("Search error: {0}")]
    Search(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Nothing decodable is left under the dataset root
    #[error("No valid images found under '{}'. Ensure images are downloaded correctly.", root.display())]
    NoValidImages { root: PathBuf },

    /// The split assigned every record to validation
    #[error("Training dataset is empty ({total} images, {valid} assigned to validation). Adjust the validation split or check the images.")]
    EmptyTrainingSet { total: usize, valid: usize },

    /// Backbone loading or feature extraction errors
    #[error("Model error: {0}")]
    Model(String),

    /// Training loop errors
    #[error("Training error: {0}")]
    Training(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new search error
    pub fn search<S: Into<String>>(msg: S) -> Self {
        Self::Search(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new training error
    pub fn training<S: Into<String>>(msg: S) -> Self {
        Self::Training(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create network error with the underlying cause
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<Path>>(operation: &str, path: P, error: &std::io::Error) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create image loading error with format context
    pub fn image_load_error<P: AsRef<Path>>(path: P, error: &image::ImageError) -> Self {
        let path_display = path.as_ref().display();
        let extension = path
            .as_ref()
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");

        Self::Image(image::ImageError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "Failed to load image '{}' (format: {}): {}",
                path_display, extension, error
            ),
        )))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }
}

/// Recoverable conditions reported alongside stage results
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineWarning {
    /// The search provider returned nothing for a category
    EmptySearchResult { category: String },
    /// A single download failed and was skipped
    DownloadFailed { url: String, reason: String },
    /// A downloaded file could not be resized and was left for validation
    ResizeFailed { path: PathBuf, reason: String },
    /// A file failed to decode and was deleted
    CorruptImageRemoved { path: PathBuf },
    /// No image was available for the final prediction
    NoPredictionImage { category: String },
}

impl std::fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySearchResult { category } => {
                write!(f, "No images found for '{}'. Skipping...", category)
            },
            Self::DownloadFailed { url, reason } => {
                write!(f, "Download failed for {}: {}", url, reason)
            },
            Self::ResizeFailed { path, reason } => {
                write!(f, "Could not resize '{}': {}", path.display(), reason)
            },
            Self::CorruptImageRemoved { path } => {
                write!(f, "Removed corrupt image '{}'", path.display())
            },
            Self::NoPredictionImage { category } => {
                write!(f, "No {} images found for prediction.", category)
            },
        }
    }
}
