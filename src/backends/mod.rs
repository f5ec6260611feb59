//! Frozen feature extractors ("backbones") used under the trainable head
//!
//! - Pooled statistics backbone (pure Rust, always available)
//! - Tract backbone (ONNX feature extractor, `tract` feature)

pub mod pooled;

#[cfg(feature = "tract")]
pub mod tract;

// Test utilities for backbone testing
#[cfg(test)]
pub mod test_utils;

use crate::config::BackboneSpec;
use crate::error::Result;
use instant::Duration;
use ndarray::{Array2, Array4};

pub use self::pooled::PooledStatsBackbone;

#[cfg(feature = "tract")]
pub use self::tract::TractBackbone;

/// A frozen feature extractor
///
/// Input batches are `[n, 3, S, S]` ImageNet-normalized tensors where `S` is
/// [`Backbone::input_size`]; the output is one feature row per image.
pub trait Backbone: Send {
    /// Short name for logs and reports
    fn name(&self) -> &str;

    /// Load whatever the backbone needs; returns the load time on first call
    ///
    /// # Errors
    /// - The backbone's model cannot be loaded
    fn initialize(&mut self) -> Result<Option<Duration>>;

    fn is_initialized(&self) -> bool;

    /// Length of each feature row
    fn feature_dim(&self) -> usize;

    /// Square side of the expected input images
    fn input_size(&self) -> u32;

    /// Extract `[n, feature_dim]` features from an `[n, 3, S, S]` batch
    ///
    /// # Errors
    /// - The backbone is not initialized
    /// - The batch has the wrong shape or the model fails
    fn extract(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>>;
}

/// Build the backbone described by the configuration
///
/// # Errors
/// - An ONNX backbone was requested without the `tract` feature
pub fn backbone_from_spec(spec: &BackboneSpec, input_size: u32) -> Result<Box<dyn Backbone>> {
    match spec {
        BackboneSpec::Pooled => Ok(Box::new(PooledStatsBackbone::new(input_size))),
        #[cfg(feature = "tract")]
        BackboneSpec::Onnx { path } => Ok(Box::new(TractBackbone::new(path.clone(), input_size))),
        #[cfg(not(feature = "tract"))]
        BackboneSpec::Onnx { path } => Err(crate::error::PipelineError::model(format!(
            "ONNX backbone '{}' requires the 'tract' feature",
            path.display()
        ))),
    }
}

/// Check a batch against the backbone's expected input shape
pub(crate) fn check_input_shape(batch: &Array4<f32>, input_size: u32) -> Result<()> {
    let (_, channels, height, width) = batch.dim();
    let side = input_size as usize;
    if channels != 3 || height != side || width != side {
        return Err(crate::error::PipelineError::model(format!(
            "Expected input batch [n, 3, {side}, {side}], got {:?}",
            batch.shape()
        )));
    }
    Ok(())
}
