//! Tract backbone: an ONNX feature extractor run with pure Rust inference
//!
//! The model is expected to take a single `[1, 3, S, S]` float input (for example
//! a ResNet-18 exported without its classifier) and its first output is flattened
//! into the feature row. Images are run one at a time so the model's batch
//! dimension can stay fixed at 1.

use super::{check_input_shape, Backbone};
use crate::error::{PipelineError, Result};
use instant::{Duration, Instant};
use ndarray::{s, Array2, Array4};
use std::path::PathBuf;
use tract_onnx::prelude::*;

/// Type alias for the optimized runnable tract model
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Backbone backed by an ONNX model file
#[derive(Debug)]
pub struct TractBackbone {
    model_path: PathBuf,
    input_size: u32,
    model: Option<TractModel>,
    feature_dim: usize,
}

impl TractBackbone {
    /// Create an uninitialized backbone for the model at `model_path`
    #[must_use]
    pub fn new(model_path: PathBuf, input_size: u32) -> Self {
        Self {
            model_path,
            input_size,
            model: None,
            feature_dim: 0,
        }
    }

    fn load_model(&mut self) -> Result<Duration> {
        let load_start = Instant::now();
        let side = self.input_size as usize;

        log::info!("🚀 Initializing Tract backbone");
        log::info!("🧠 Model: {}", self.model_path.display());
        log::info!("📐 Input: [1, 3, {side}, {side}]");

        let model = tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .map_err(|e| {
                PipelineError::model(format!(
                    "Failed to load ONNX model '{}': {e}",
                    self.model_path.display()
                ))
            })?
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())
            .map_err(|e| PipelineError::model(format!("Failed to set model input shape: {e}")))?
            .into_optimized()
            .map_err(|e| PipelineError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| PipelineError::model(format!("Failed to create runnable model: {e}")))?;

        // Probe once to learn the feature width
        let probe = Array4::<f32>::zeros((1, 3, side, side));
        self.feature_dim = Self::run_single(&model, probe)?.len();
        self.model = Some(model);

        let load_time = load_start.elapsed();
        log::info!(
            "✅ Tract backbone ready in {}ms ({} features)",
            load_time.as_millis(),
            self.feature_dim
        );
        Ok(load_time)
    }

    fn run_single(model: &TractModel, input: Array4<f32>) -> Result<Vec<f32>> {
        let outputs = model
            .run(tvec![Tensor::from(input).into()])
            .map_err(|e| PipelineError::model(format!("Tract inference failed: {e}")))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::model("Model produced no output tensor"))?;

        let view = output
            .to_array_view::<f32>()
            .map_err(|e| PipelineError::model(format!("Failed to read output tensor: {e}")))?;
        Ok(view.iter().copied().collect())
    }
}

impl Backbone for TractBackbone {
    fn name(&self) -> &str {
        "tract-onnx"
    }

    fn initialize(&mut self) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        self.load_model().map(Some)
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn extract(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        check_input_shape(batch, self.input_size)?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PipelineError::model("Tract backbone not initialized"))?;

        let n = batch.dim().0;
        let mut features = Array2::<f32>::zeros((n, self.feature_dim));
        for index in 0..n {
            let single = batch.slice(s![index..=index, .., .., ..]).to_owned();
            let row = Self::run_single(model, single)?;
            if row.len() != self.feature_dim {
                return Err(PipelineError::model(format!(
                    "Feature width changed from {} to {}",
                    self.feature_dim,
                    row.len()
                )));
            }
            features
                .row_mut(index)
                .iter_mut()
                .zip(row)
                .for_each(|(slot, value)| *slot = value);
        }

        log::debug!("🔮 Extracted features for {} images", n);
        Ok(features)
    }
}

#[cfg(all(test, feature = "tract"))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_uninitialized_backbone() {
        let mut backbone = TractBackbone::new(PathBuf::from("/nonexistent/resnet18.onnx"), 32);
        assert!(!backbone.is_initialized());
        assert_eq!(backbone.input_size(), 32);
        assert_eq!(backbone.feature_dim(), 0);

        let err = backbone.extract(&Array4::zeros((1, 3, 32, 32))).unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }

    #[test]
    fn test_missing_model_fails_to_initialize() {
        let mut backbone = TractBackbone::new(PathBuf::from("/nonexistent/resnet18.onnx"), 32);
        assert!(backbone.initialize().is_err());
        assert!(!backbone.is_initialized());
    }

    #[test]
    fn test_invalid_model_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.onnx");
        std::fs::write(&path, b"not a protobuf").unwrap();

        let mut backbone = TractBackbone::new(path, 32);
        let err = backbone.initialize().unwrap_err();
        assert!(matches!(err, PipelineError::Model(_)));
    }
}
