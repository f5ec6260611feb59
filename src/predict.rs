//! Picking and classifying the image for the final prediction

use crate::error::{PipelineWarning, Result};
use crate::learner::{Learner, Prediction};
use crate::services::ImageIOService;
use std::path::{Path, PathBuf};

/// Result of the prediction step
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    /// The image was classified
    Predicted { path: PathBuf, prediction: Prediction },
    /// The category directory held no image
    Unavailable { category: String },
}

impl PredictionOutcome {
    #[must_use]
    pub fn prediction(&self) -> Option<&Prediction> {
        match self {
            Self::Predicted { prediction, .. } => Some(prediction),
            Self::Unavailable { .. } => None,
        }
    }
}

/// First image file in `dir` by sorted path, not descending into subdirectories
#[must_use]
pub fn first_image_in<P: AsRef<Path>>(dir: P) -> Option<PathBuf> {
    match ImageIOService::list_image_files(dir.as_ref(), false) {
        Ok(files) => files.into_iter().next(),
        Err(e) => {
            log::debug!("Could not list {}: {}", dir.as_ref().display(), e);
            None
        },
    }
}

/// Classify the first image of `category` under `root`
///
/// A missing image is not an error: the outcome is `Unavailable` and a warning
/// is returned alongside it.
///
/// # Errors
/// - The chosen image cannot be classified
pub fn predict_category(
    learner: &mut Learner,
    root: &Path,
    category: &str,
) -> Result<(PredictionOutcome, Option<PipelineWarning>)> {
    let Some(path) = first_image_in(root.join(category)) else {
        let warning = PipelineWarning::NoPredictionImage {
            category: category.to_string(),
        };
        return Ok((
            PredictionOutcome::Unavailable {
                category: category.to_string(),
            },
            Some(warning),
        ));
    };

    predict_file(learner, &path).map(|outcome| (outcome, None))
}

/// Classify an explicit image file
///
/// # Errors
/// - The image cannot be decoded or classified
pub fn predict_file(learner: &mut Learner, path: &Path) -> Result<PredictionOutcome> {
    let prediction = learner.predict(path)?;
    log::info!(
        "🔮 {} -> {} ({:.1}% confidence)",
        path.display(),
        prediction.label,
        prediction.confidence * 100.0
    );
    Ok(PredictionOutcome::Predicted {
        path: path.to_path_buf(),
        prediction,
    })
}
