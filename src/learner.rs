//! Fine-tuning a softmax classifier head over a frozen backbone
//!
//! Backbone features for each partition are extracted once and standardized with
//! the training partition's statistics. Only the linear head is trained, with
//! mini-batch SGD and L2 weight decay. Nothing is persisted.

use crate::backends::Backbone;
use crate::config::PipelineConfig;
use crate::dataset::DataLoader;
use crate::error::{PipelineError, Result};
use crate::services::ImageIOService;
use crate::tracing_config::{events, spans};
use crate::utils::{ImagePreprocessor, PreprocessingOptions};
use image::DynamicImage;
use instant::Instant;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::Path;

/// Standard deviations below this are treated as constant features
const MIN_FEATURE_STD: f32 = 1e-6;

/// Hyperparameters of the head training loop
#[derive(Debug, Clone, PartialEq)]
pub struct LearnerConfig {
    pub batch_size: usize,
    pub learning_rate: f32,
    pub weight_decay: f32,
    /// Seeds the per-pass shuffle
    pub seed: u64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            learning_rate: 0.05,
            weight_decay: 1e-4,
            seed: 42,
        }
    }
}

impl From<&PipelineConfig> for LearnerConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            learning_rate: config.learning_rate,
            weight_decay: config.weight_decay,
            seed: config.seed,
        }
    }
}

/// Metrics after one training pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    /// 1-based pass number
    pub epoch: usize,
    /// Mean cross-entropy over the training partition during the pass
    pub train_loss: f32,
    /// Mean cross-entropy on the validation partition, if there is one
    pub valid_loss: Option<f32>,
    /// Fraction of validation images misclassified, if there is a validation partition
    pub error_rate: Option<f32>,
}

/// Outcome of [`Learner::fine_tune`]
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub backbone: String,
    pub feature_dim: usize,
    pub train_size: usize,
    pub valid_size: usize,
    pub epochs: Vec<EpochMetrics>,
    pub duration_ms: u64,
}

impl TrainingReport {
    #[must_use]
    pub fn final_metrics(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// Result of classifying one image
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub class_index: usize,
    /// Probability of the predicted class
    pub confidence: f32,
    /// Probability per class, in class-vocabulary order
    pub probabilities: Vec<f32>,
}

/// Frozen backbone plus trainable linear softmax head
pub struct Learner {
    backbone: Box<dyn Backbone>,
    classes: Vec<String>,
    config: LearnerConfig,
    weights: Array2<f32>,
    bias: Array1<f32>,
    feature_mean: Array1<f32>,
    feature_std: Array1<f32>,
    trained: bool,
}

impl std::fmt::Debug for Learner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Learner")
            .field("backbone", &self.backbone.name())
            .field("classes", &self.classes)
            .field("config", &self.config)
            .field("trained", &self.trained)
            .finish_non_exhaustive()
    }
}

impl Learner {
    /// Create a learner and initialize its backbone
    ///
    /// # Errors
    /// - `classes` is empty
    /// - Invalid hyperparameters
    /// - The backbone fails to initialize
    pub fn new(
        mut backbone: Box<dyn Backbone>,
        classes: Vec<String>,
        config: LearnerConfig,
    ) -> Result<Self> {
        if classes.is_empty() {
            return Err(PipelineError::training("At least one class is required"));
        }
        if config.batch_size == 0 {
            return Err(PipelineError::config_value_error("batch size", config.batch_size, ">= 1", Some(8)));
        }
        if !config.learning_rate.is_finite() || config.learning_rate <= 0.0 {
            return Err(PipelineError::config_value_error(
                "learning rate",
                config.learning_rate,
                "> 0.0",
                Some(0.05),
            ));
        }

        if !backbone.is_initialized() {
            if let Some(load_time) = backbone.initialize()? {
                events::performance_metric("backbone_initialization", load_time.as_millis() as u64);
            }
        }

        let dim = backbone.feature_dim();
        let num_classes = classes.len();
        Ok(Self {
            backbone,
            classes,
            config,
            weights: Array2::zeros((dim, num_classes)),
            bias: Array1::zeros(num_classes),
            feature_mean: Array1::zeros(dim),
            feature_std: Array1::ones(dim),
            trained: false,
        })
    }

    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Train the head for `passes` passes over `train`, evaluating on `valid` after each
    ///
    /// # Errors
    /// - `passes` is zero or `train` is empty
    /// - The loaders disagree with the learner's class vocabulary or input size
    /// - Image loading or feature extraction fails
    pub fn fine_tune(
        &mut self,
        train: &DataLoader,
        valid: &DataLoader,
        passes: usize,
    ) -> Result<TrainingReport> {
        if passes == 0 {
            return Err(PipelineError::config_value_error("fine-tune passes", passes, ">= 1", Some(3)));
        }
        if train.is_empty() {
            return Err(PipelineError::EmptyTrainingSet {
                total: valid.len(),
                valid: valid.len(),
            });
        }

        let _span = spans::training(self.backbone.name(), train.len(), valid.len(), passes).entered();
        let start = Instant::now();

        let (train_raw, train_labels) = self.extract_features(train)?;
        self.fit_standardization(&train_raw);
        let train_x = self.standardize(train_raw);

        let (valid_x, valid_labels) = if valid.is_empty() {
            (None, Vec::new())
        } else {
            let (raw, labels) = self.extract_features(valid)?;
            (Some(self.standardize(raw)), labels)
        };

        let mut epochs = Vec::with_capacity(passes);
        for epoch in 1..=passes {
            let train_loss = self.train_pass(&train_x, &train_labels, epoch)?;
            let (valid_loss, error_rate) = match &valid_x {
                Some(x) => {
                    let (loss, error_rate) = self.evaluate(x, &valid_labels)?;
                    (Some(loss), Some(error_rate))
                },
                None => (None, None),
            };

            events::epoch_metrics(epoch, train_loss, valid_loss, error_rate);
            epochs.push(EpochMetrics {
                epoch,
                train_loss,
                valid_loss,
                error_rate,
            });
        }

        self.trained = true;
        let duration_ms = start.elapsed().as_millis() as u64;
        events::performance_metric("fine_tune", duration_ms);

        Ok(TrainingReport {
            backbone: self.backbone.name().to_string(),
            feature_dim: self.backbone.feature_dim(),
            train_size: train.len(),
            valid_size: valid.len(),
            epochs,
            duration_ms,
        })
    }

    /// Classify the image stored at `path`
    ///
    /// # Errors
    /// - The learner has not been fine-tuned
    /// - The image cannot be decoded or features cannot be extracted
    pub fn predict<P: AsRef<Path>>(&mut self, path: P) -> Result<Prediction> {
        let image = ImageIOService::load_image(path)?;
        self.predict_image(&image)
    }

    /// Classify an in-memory image
    ///
    /// # Errors
    /// - The learner has not been fine-tuned
    /// - Feature extraction fails
    pub fn predict_image(&mut self, image: &DynamicImage) -> Result<Prediction> {
        if !self.trained {
            return Err(PipelineError::training(
                "Learner must be fine-tuned before predicting",
            ));
        }

        let options = PreprocessingOptions::imagenet(self.backbone.input_size());
        let tensor = ImagePreprocessor::preprocess_image(image, &options)?;
        let raw = self.backbone.extract(&tensor)?;
        let features = self.standardize(raw);
        let probabilities = softmax(&self.logits(&features));

        let row = probabilities.row(0);
        let (class_index, confidence) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });
        let label = self
            .classes
            .get(class_index)
            .cloned()
            .ok_or_else(|| PipelineError::internal("Predicted class index out of range"))?;

        Ok(Prediction {
            label,
            class_index,
            confidence,
            probabilities: row.to_vec(),
        })
    }

    fn extract_features(&mut self, loader: &DataLoader) -> Result<(Array2<f32>, Vec<usize>)> {
        if loader.classes() != self.classes.as_slice() {
            return Err(PipelineError::training(format!(
                "Loader classes {:?} do not match learner classes {:?}",
                loader.classes(),
                self.classes
            )));
        }
        if loader.preprocessing().target_size != self.backbone.input_size() {
            return Err(PipelineError::training(format!(
                "Loader resizes to {}px but the backbone expects {}px",
                loader.preprocessing().target_size,
                self.backbone.input_size()
            )));
        }

        let dim = self.backbone.feature_dim();
        let mut values = Vec::with_capacity(loader.len() * dim);
        let mut labels = Vec::with_capacity(loader.len());
        for batch in loader.batches() {
            let batch = batch?;
            let features = self.backbone.extract(&batch.images)?;
            if features.ncols() != dim {
                return Err(PipelineError::model(format!(
                    "Backbone returned {} features, expected {}",
                    features.ncols(),
                    dim
                )));
            }
            values.extend(features.iter().copied());
            labels.extend_from_slice(&batch.labels);
            log::trace!("Extracted features for {} images", batch.len());
        }

        let features = Array2::from_shape_vec((labels.len(), dim), values)
            .map_err(|e| PipelineError::internal(format!("Feature matrix shape mismatch: {}", e)))?;
        Ok((features, labels))
    }

    fn fit_standardization(&mut self, features: &Array2<f32>) {
        if let Some(mean) = features.mean_axis(Axis(0)) {
            self.feature_mean = mean;
        }
        self.feature_std = features
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s < MIN_FEATURE_STD { 1.0 } else { s });
    }

    fn standardize(&self, mut features: Array2<f32>) -> Array2<f32> {
        features -= &self.feature_mean;
        features /= &self.feature_std;
        features
    }

    fn logits(&self, features: &Array2<f32>) -> Array2<f32> {
        features.dot(&self.weights) + &self.bias
    }

    /// One SGD pass in a seeded random order; returns the mean training loss
    fn train_pass(&mut self, x: &Array2<f32>, labels: &[usize], epoch: usize) -> Result<f32> {
        let mut order: Vec<usize> = (0..labels.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64)));

        let mut total_loss = 0.0_f32;
        for chunk in order.chunks(self.config.batch_size) {
            let xb = x.select(Axis(0), chunk);
            let yb: Vec<usize> = chunk.iter().filter_map(|&i| labels.get(i).copied()).collect();
            let probs = softmax(&self.logits(&xb));
            total_loss += cross_entropy_sum(&probs, &yb)?;

            let mut grad = probs;
            for (row, &label) in yb.iter().enumerate() {
                if let Some(g) = grad.get_mut((row, label)) {
                    *g -= 1.0;
                }
            }
            let m = chunk.len() as f32;
            let grad_w = xb.t().dot(&grad) / m + &self.weights * self.config.weight_decay;
            let grad_b = grad.sum_axis(Axis(0)) / m;

            self.weights.scaled_add(-self.config.learning_rate, &grad_w);
            self.bias.scaled_add(-self.config.learning_rate, &grad_b);
        }

        let loss = total_loss / labels.len().max(1) as f32;
        if !loss.is_finite() {
            return Err(PipelineError::training(format!(
                "Training diverged in pass {} (loss {}). Try a lower learning rate.",
                epoch, loss
            )));
        }
        Ok(loss)
    }

    /// Mean loss and error rate on a standardized feature matrix
    fn evaluate(&self, x: &Array2<f32>, labels: &[usize]) -> Result<(f32, f32)> {
        let probs = softmax(&self.logits(x));
        let loss = cross_entropy_sum(&probs, labels)? / labels.len().max(1) as f32;

        let wrong = probs
            .outer_iter()
            .zip(labels)
            .filter(|(row, label)| argmax(row.iter().copied()) != **label)
            .count();
        Ok((loss, wrong as f32 / labels.len().max(1) as f32))
    }
}

fn argmax<I: Iterator<Item = f32>>(values: I) -> usize {
    values
        .enumerate()
        .fold((0, f32::MIN), |best, (i, v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// Row-wise softmax, shifted by the row max for stability
fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.outer_iter_mut() {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row /= sum;
        }
    }
    probs
}

fn cross_entropy_sum(probs: &Array2<f32>, labels: &[usize]) -> Result<f32> {
    labels
        .iter()
        .enumerate()
        .map(|(row, &label)| {
            probs
                .get((row, label))
                .map(|p| -p.max(f32::MIN_POSITIVE).ln())
                .ok_or_else(|| PipelineError::internal(format!("Label {} out of range", label)))
        })
        .sum()
}
