//! Shared image preprocessing utilities
//!
//! Images are squished to a square (aspect ratio is not preserved) and written
//! into NCHW tensors normalized with the ImageNet channel statistics that
//! pretrained backbones expect.

use crate::error::{PipelineError, Result};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use ndarray::{s, Array4, ArrayViewMut3};

/// ImageNet channel means (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Configuration for preprocessing behavior
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingOptions {
    /// Square side of the output tensor
    pub target_size: u32,
    /// Per-channel mean subtracted after scaling to `0..1`
    pub normalization_mean: [f32; 3],
    /// Per-channel divisor applied after mean subtraction
    pub normalization_std: [f32; 3],
    /// Resampling filter used for the squish
    pub filter: FilterType,
}

impl PreprocessingOptions {
    /// ImageNet normalization at the given square size
    #[must_use]
    pub fn imagenet(target_size: u32) -> Self {
        Self {
            target_size,
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
            filter: FilterType::Triangle,
        }
    }
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self::imagenet(192)
    }
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Squish an image to `target_size` square RGB
    #[must_use]
    pub fn squish(image: &DynamicImage, options: &PreprocessingOptions) -> RgbImage {
        let rgb = image.to_rgb8();
        if rgb.width() == options.target_size && rgb.height() == options.target_size {
            return rgb;
        }
        image::imageops::resize(&rgb, options.target_size, options.target_size, options.filter)
    }

    /// Preprocess a single image into a `[1, 3, S, S]` tensor
    ///
    /// # Errors
    /// - `target_size` is zero
    pub fn preprocess_image(
        image: &DynamicImage,
        options: &PreprocessingOptions,
    ) -> Result<Array4<f32>> {
        let size = Self::tensor_side(options)?;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        let squished = Self::squish(image, options);
        Self::write_normalized(&squished, options, tensor.slice_mut(s![0, .., .., ..]));
        Ok(tensor)
    }

    /// Preprocess several images into one `[n, 3, S, S]` tensor
    ///
    /// # Errors
    /// - `target_size` is zero
    pub fn preprocess_batch(
        images: &[DynamicImage],
        options: &PreprocessingOptions,
    ) -> Result<Array4<f32>> {
        let size = Self::tensor_side(options)?;
        let mut tensor = Array4::<f32>::zeros((images.len(), 3, size, size));
        for (index, image) in images.iter().enumerate() {
            let squished = Self::squish(image, options);
            Self::write_normalized(&squished, options, tensor.slice_mut(s![index, .., .., ..]));
        }
        Ok(tensor)
    }

    fn tensor_side(options: &PreprocessingOptions) -> Result<usize> {
        if options.target_size == 0 {
            return Err(PipelineError::invalid_config(
                "Preprocessing target size must be at least 1",
            ));
        }
        usize::try_from(options.target_size).map_err(|_| {
            PipelineError::internal("Target size too large for usize conversion in tensor allocation")
        })
    }

    #[allow(clippy::indexing_slicing)]
    fn write_normalized(image: &RgbImage, options: &PreprocessingOptions, mut out: ArrayViewMut3<f32>) {
        debug_assert_eq!(
            out.dim(),
            (3, image.height() as usize, image.width() as usize)
        );
        for (x, y, pixel) in image.enumerate_pixels() {
            let (xi, yi) = (x as usize, y as usize);
            for c in 0..3 {
                let scaled = f32::from(pixel.0[c]) / 255.0;
                out[[c, yi, xi]] =
                    (scaled - options.normalization_mean[c]) / options.normalization_std[c];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn create_test_image(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_squish_ignores_aspect_ratio() {
        let options = PreprocessingOptions::imagenet(32);
        let squished = ImagePreprocessor::squish(&create_test_image(100, 20, [0, 0, 0]), &options);
        assert_eq!(squished.dimensions(), (32, 32));
    }

    #[test]
    fn test_preprocess_image_normalization() {
        let options = PreprocessingOptions::imagenet(8);
        let tensor =
            ImagePreprocessor::preprocess_image(&create_test_image(20, 10, [255, 0, 128]), &options)
                .unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 8, 8]);

        let expected_r = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let expected_g = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((tensor[[0, 0, 3, 3]] - expected_r).abs() < 1e-5);
        assert!((tensor[[0, 1, 7, 0]] - expected_g).abs() < 1e-5);
    }

    #[test]
    fn test_preprocess_batch_shapes() {
        let options = PreprocessingOptions::imagenet(16);
        let images = vec![
            create_test_image(30, 30, [10, 20, 30]),
            create_test_image(5, 40, [200, 100, 50]),
            create_test_image(16, 16, [0, 255, 0]),
        ];
        let tensor = ImagePreprocessor::preprocess_batch(&images, &options).unwrap();
        assert_eq!(tensor.shape(), &[3, 3, 16, 16]);

        let empty = ImagePreprocessor::preprocess_batch(&[], &options).unwrap();
        assert_eq!(empty.shape(), &[0, 3, 16, 16]);
    }

    #[test]
    fn test_zero_target_size_rejected() {
        let options = PreprocessingOptions::imagenet(0);
        assert!(ImagePreprocessor::preprocess_image(&create_test_image(4, 4, [1, 2, 3]), &options).is_err());
    }
}
