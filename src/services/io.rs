//! Image file I/O service
//!
//! Keeps decoding, in-place resizing and directory listing out of the pipeline
//! stages so they can be tested on their own.

use crate::error::{PipelineError, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions treated as image files (lowercase)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff"];

/// Outcome of shrinking every image in a directory
#[derive(Debug, Clone, Default)]
pub struct ResizeSummary {
    /// Files rewritten at a smaller size
    pub resized: usize,
    /// Files already within bounds
    pub unchanged: usize,
    /// `(path, reason)` for files that could not be processed
    pub failed: Vec<(PathBuf, String)>,
}

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Check if a (lowercase or mixed-case) extension is a supported image type
    #[must_use]
    pub fn is_supported_extension(extension: &str) -> bool {
        let lower = extension.to_lowercase();
        IMAGE_EXTENSIONS.contains(&lower.as_str())
    }

    /// Check if a file path has a supported image extension
    ///
    /// # Examples
    /// ```rust
    /// use imgly_classify::services::ImageIOService;
    ///
    /// assert!(ImageIOService::is_supported_format("bird/robin.JPG"));
    /// assert!(!ImageIOService::is_supported_format("bird/notes.txt"));
    /// ```
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(Self::is_supported_extension)
    }

    /// Load an image from a file path
    ///
    /// Extension-based format detection is tried first, then content sniffing, since
    /// downloaded files are often served with a misleading extension.
    ///
    /// # Errors
    /// - The file does not exist or cannot be read
    /// - Neither detection method can decode the data
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(PipelineError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );

                let data = std::fs::read(path_ref).map_err(|io_err| {
                    PipelineError::file_io_error("read image data", path_ref, &io_err)
                })?;

                image::load_from_memory(&data)
                    .map_err(|content_err| PipelineError::image_load_error(path_ref, &content_err))
            },
        }
    }

    /// Decode a file fully and reject empty images
    ///
    /// # Errors
    /// - The file cannot be decoded or has zero width or height
    pub fn verify_image<P: AsRef<Path>>(path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let image = Self::load_image(path_ref)?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::Image(image::ImageError::IoError(
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Image '{}' has no pixels", path_ref.display()),
                ),
            )));
        }
        Ok(())
    }

    /// Save an image, choosing the encoder from the path's extension
    ///
    /// JPEG has no alpha channel, so images are flattened to RGB first.
    ///
    /// # Errors
    /// - Unknown extension or encoder failure
    pub fn save_image<P: AsRef<Path>>(image: &DynamicImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let format = ImageFormat::from_path(path_ref)?;

        let result = match format {
            ImageFormat::Jpeg => {
                DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path_ref, format)
            },
            _ => image.save_with_format(path_ref, format),
        };

        result.map_err(PipelineError::from)
    }

    /// Shrink an image file in place so neither side exceeds `max_size`
    ///
    /// Returns `true` if the file was rewritten. Aspect ratio is preserved and
    /// images already within bounds are not touched.
    ///
    /// # Errors
    /// - The file cannot be decoded or re-encoded
    pub fn resize_to_max<P: AsRef<Path>>(path: P, max_size: u32) -> Result<bool> {
        let path_ref = path.as_ref();
        let image = Self::load_image(path_ref)?;
        let (width, height) = image.dimensions();

        if width <= max_size && height <= max_size {
            return Ok(false);
        }

        let resized = image.resize(max_size, max_size, FilterType::Lanczos3);
        log::trace!(
            "Resized {} from {}x{} to {}x{}",
            path_ref.display(),
            width,
            height,
            resized.width(),
            resized.height()
        );
        Self::save_image(&resized, path_ref)?;
        Ok(true)
    }

    /// Shrink every image directly inside `dir`
    ///
    /// # Errors
    /// - The directory cannot be listed
    pub fn resize_directory<P: AsRef<Path>>(dir: P, max_size: u32) -> Result<ResizeSummary> {
        let mut summary = ResizeSummary::default();

        for path in Self::list_image_files(dir, false)? {
            match Self::resize_to_max(&path, max_size) {
                Ok(true) => summary.resized += 1,
                Ok(false) => summary.unchanged += 1,
                Err(e) => summary.failed.push((path, e.to_string())),
            }
        }

        Ok(summary)
    }

    /// List image files under `dir`, sorted by path
    ///
    /// A missing directory yields an empty list.
    ///
    /// # Errors
    /// - A directory entry cannot be read
    pub fn list_image_files<P: AsRef<Path>>(dir: P, recursive: bool) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let walker = WalkDir::new(dir).min_depth(1);
        let walker = if recursive { walker } else { walker.max_depth(1) };

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let message = e.to_string();
                PipelineError::file_io_error(
                    "list directory",
                    dir,
                    &e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, message)),
                )
            })?;

            if entry.file_type().is_file() && Self::is_supported_format(entry.path()) {
                files.push(entry.into_path());
            }
        }

        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, RgbaImage};
    use tempfile::tempdir;

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([10, 200, 30]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_is_supported_format() {
        assert!(ImageIOService::is_supported_format("test.jpg"));
        assert!(ImageIOService::is_supported_format("test.JPEG"));
        assert!(ImageIOService::is_supported_format("test.png"));
        assert!(ImageIOService::is_supported_format("test.gif"));
        assert!(ImageIOService::is_supported_format("test.webp"));
        assert!(ImageIOService::is_supported_format("test.tif"));
        assert!(ImageIOService::is_supported_format("test.bmp"));

        assert!(!ImageIOService::is_supported_format("test.txt"));
        assert!(!ImageIOService::is_supported_format("test.jpg.part"));
        assert!(!ImageIOService::is_supported_format(".acquisition.json"));
        assert!(!ImageIOService::is_supported_format("test"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ImageIOService::load_image("/nonexistent/robin.jpg");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read image file"));
    }

    #[test]
    fn test_load_misnamed_file_by_content() {
        let dir = tempdir().unwrap();
        let png_path = dir.path().join("real.png");
        write_png(&png_path, 4, 4);
        let misnamed = dir.path().join("actually_png.jpg");
        std::fs::copy(&png_path, &misnamed).unwrap();

        let image = ImageIOService::load_image(&misnamed).unwrap();
        assert_eq!(image.dimensions(), (4, 4));
    }

    #[test]
    fn test_verify_image() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.png");
        write_png(&good, 3, 2);
        assert!(ImageIOService::verify_image(&good).is_ok());

        let garbage = dir.path().join("garbage.jpg");
        std::fs::write(&garbage, b"<html>not an image</html>").unwrap();
        assert!(ImageIOService::verify_image(&garbage).is_err());

        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        assert!(ImageIOService::verify_image(&empty).is_err());
    }

    #[test]
    fn test_resize_to_max_preserves_aspect() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wide.png");
        write_png(&path, 800, 400);

        assert!(ImageIOService::resize_to_max(&path, 400).unwrap());
        let resized = image::open(&path).unwrap();
        assert_eq!(resized.dimensions(), (400, 200));

        // Second pass is a no-op
        assert!(!ImageIOService::resize_to_max(&path, 400).unwrap());
    }

    #[test]
    fn test_resize_jpeg_with_alpha_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alpha.jpg");
        // PNG bytes with an alpha channel behind a .jpg name
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(600, 300, image::Rgba([1, 2, 3, 128])));
        rgba.save_with_format(&path, ImageFormat::Png).unwrap();

        assert!(ImageIOService::resize_to_max(&path, 300).unwrap());
        let resized = image::open(&path).unwrap();
        assert_eq!(resized.dimensions(), (300, 150));
    }

    #[test]
    fn test_resize_directory_collects_failures() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("big.png"), 1000, 500);
        write_png(&dir.path().join("small.png"), 100, 50);
        std::fs::write(dir.path().join("broken.jpg"), b"nope").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let summary = ImageIOService::resize_directory(dir.path(), 400).unwrap();
        assert_eq!(summary.resized, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].0.ends_with("broken.jpg"));
    }

    #[test]
    fn test_list_image_files() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("bird");
        std::fs::create_dir_all(&nested).unwrap();
        write_png(&dir.path().join("b.png"), 2, 2);
        write_png(&nested.join("a.png"), 2, 2);
        std::fs::write(nested.join("skip.txt"), b"x").unwrap();

        let flat = ImageIOService::list_image_files(dir.path(), false).unwrap();
        assert_eq!(flat.len(), 1);

        let all = ImageIOService::list_image_files(dir.path(), true).unwrap();
        assert_eq!(all.len(), 2);
        let mut sorted = all.clone();
        sorted.sort();
        assert_eq!(all, sorted);

        let missing = ImageIOService::list_image_files(dir.path().join("missing"), true).unwrap();
        assert!(missing.is_empty());
    }
}
