//! Utility modules

pub mod preprocessing;

pub use preprocessing::{ImagePreprocessor, PreprocessingOptions, IMAGENET_MEAN, IMAGENET_STD};
