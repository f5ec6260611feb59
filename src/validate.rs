//! Dataset validation
//!
//! Every image file under the dataset root is fully decoded; files that fail are
//! deleted so that nothing downstream has to cope with broken data.

use crate::error::{PipelineError, PipelineWarning, Result};
use crate::services::ImageIOService;
use std::path::{Path, PathBuf};

/// Outcome of a validation sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// Files deleted because they could not be decoded
    pub removed: Vec<PathBuf>,
    /// Files that decoded successfully, sorted by path
    pub valid: Vec<PathBuf>,
}

impl ValidationReport {
    /// One `CorruptImageRemoved` warning per deleted file
    #[must_use]
    pub fn warnings(&self) -> Vec<PipelineWarning> {
        self.removed
            .iter()
            .map(|path| PipelineWarning::CorruptImageRemoved { path: path.clone() })
            .collect()
    }
}

/// Decode every image under `root` and delete the ones that fail
///
/// A missing root is treated as an empty dataset.
///
/// # Errors
/// - The directory tree cannot be listed
/// - A corrupt file cannot be deleted
pub fn validate_dataset<P: AsRef<Path>>(root: P) -> Result<ValidationReport> {
    let root = root.as_ref();
    let mut report = ValidationReport::default();

    for path in ImageIOService::list_image_files(root, true)? {
        match ImageIOService::verify_image(&path) {
            Ok(()) => report.valid.push(path),
            Err(e) => {
                log::debug!("Removing corrupt image {}: {}", path.display(), e);
                std::fs::remove_file(&path)
                    .map_err(|io_err| PipelineError::file_io_error("delete corrupt image", &path, &io_err))?;
                report.removed.push(path);
            },
        }
    }

    log::info!(
        "🧹 Verified {} images under {}: {} removed",
        report.valid.len() + report.removed.len(),
        root.display(),
        report.removed.len()
    );

    Ok(report)
}

/// Like [`validate_dataset`], but failing when nothing valid remains
///
/// # Errors
/// - Everything [`validate_dataset`] can return
/// - `PipelineError::NoValidImages` when the valid set is empty
pub fn require_valid_images<P: AsRef<Path>>(root: P) -> Result<ValidationReport> {
    let root = root.as_ref();
    let report = validate_dataset(root)?;
    if report.valid.is_empty() {
        return Err(PipelineError::NoValidImages {
            root: root.to_path_buf(),
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn setup_dataset() -> TempDir {
        let temp = TempDir::new().unwrap();
        for category in ["forest", "bird"] {
            let dir = temp.path().join(category);
            std::fs::create_dir_all(&dir).unwrap();
            RgbImage::from_pixel(6, 6, Rgb([1, 2, 3]))
                .save(dir.join("good.png"))
                .unwrap();
        }
        std::fs::write(temp.path().join("bird").join("truncated.jpg"), [0xFF, 0xD8, 0xFF]).unwrap();
        std::fs::write(temp.path().join("forest").join("empty.png"), b"").unwrap();
        std::fs::write(temp.path().join("forest").join("readme.txt"), b"not an image").unwrap();
        temp
    }

    #[test]
    fn test_removes_exactly_the_corrupt_files() {
        let temp = setup_dataset();
        let report = validate_dataset(temp.path()).unwrap();

        assert_eq!(report.valid.len(), 2);
        assert_eq!(report.removed.len(), 2);
        assert!(!temp.path().join("bird").join("truncated.jpg").exists());
        assert!(!temp.path().join("forest").join("empty.png").exists());
        assert!(temp.path().join("forest").join("readme.txt").exists());
        assert_eq!(report.warnings().len(), 2);
    }

    #[test]
    fn test_second_run_removes_nothing() {
        let temp = setup_dataset();
        let first = validate_dataset(temp.path()).unwrap();
        let second = validate_dataset(temp.path()).unwrap();

        assert!(second.removed.is_empty());
        assert_eq!(first.valid, second.valid);
    }

    #[test]
    fn test_no_valid_images_is_fatal() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("bird");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("broken.png"), b"garbage").unwrap();

        let err = require_valid_images(temp.path()).unwrap_err();
        assert!(matches!(err, PipelineError::NoValidImages { .. }));
        assert!(!dir.join("broken.png").exists());
    }

    #[test]
    fn test_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let report = validate_dataset(temp.path().join("absent")).unwrap();
        assert_eq!(report, ValidationReport::default());
    }
}
