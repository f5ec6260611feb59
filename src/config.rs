//! Configuration types for the acquisition and training pipeline

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `SafeSearch` level passed to the `DuckDuckGo` image endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeSearch {
    On,
    Moderate,
    Off,
}

impl SafeSearch {
    /// Value of the `p` query parameter
    #[must_use]
    pub fn as_param(self) -> &'static str {
        match self {
            Self::On | Self::Moderate => "1",
            Self::Off => "-1",
        }
    }
}

impl Default for SafeSearch {
    fn default() -> Self {
        Self::Moderate
    }
}

fn default_region() -> String {
    "wt-wt".to_string()
}

/// Which image search provider to query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum SearchConfig {
    /// Live `DuckDuckGo` image search
    #[serde(rename = "duckduckgo")]
    DuckDuckGo {
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        safesearch: SafeSearch,
    },
    /// Fixed URL lists keyed by query term
    #[serde(rename = "static")]
    Static {
        #[serde(default)]
        urls: BTreeMap<String, Vec<String>>,
    },
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self::DuckDuckGo {
            region: default_region(),
            safesearch: SafeSearch::default(),
        }
    }
}

/// Frozen feature extractor used under the trainable head
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackboneSpec {
    /// Pure Rust pooled colour and texture statistics
    Pooled,
    /// ONNX feature extractor run with tract
    Onnx { path: PathBuf },
}

impl Default for BackboneSpec {
    fn default() -> Self {
        Self::Pooled
    }
}

impl std::fmt::Display for BackboneSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pooled => write!(f, "pooled"),
            Self::Onnx { path } => write!(f, "onnx:{}", path.display()),
        }
    }
}

/// Target of the pre-flight reachability probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// `host:port` to connect to
    pub address: String,
    /// Connect timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            address: "1.1.1.1:53".to_string(),
            timeout_ms: 1000,
        }
    }
}

impl ConnectivityConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration for a full pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one subdirectory per category
    pub dataset_root: PathBuf,

    /// Category labels, in acquisition order
    pub categories: Vec<String>,

    /// Appended to each category to form the search term
    pub query_suffix: String,

    /// Maximum search results requested per category
    pub images_per_category: usize,

    /// Downloaded images are shrunk so no side exceeds this (pixels)
    pub max_image_size: u32,

    /// Pause after each category's downloads (seconds)
    pub throttle_secs: u64,

    /// Per-request HTTP timeout (seconds)
    pub download_timeout_secs: u64,

    /// Pre-flight reachability probe
    pub connectivity: ConnectivityConfig,

    /// Image search provider
    pub search: SearchConfig,

    /// Fraction of records assigned to validation (0.0 to <1.0)
    pub valid_fraction: f64,

    /// Seed for the split and for per-pass shuffling
    pub seed: u64,

    /// Images per batch
    pub batch_size: usize,

    /// Square side images are squished to before feature extraction
    pub resize_px: u32,

    /// Number of training passes over the training partition
    pub fine_tune_passes: usize,

    /// SGD step size for the classifier head
    pub learning_rate: f32,

    /// L2 penalty on head weights
    pub weight_decay: f32,

    /// Frozen feature extractor
    pub backbone: BackboneSpec,

    /// Category whose first image is used for the final prediction
    pub predict_category: String,

    /// Skip categories already recorded as acquired
    pub resume: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::from("dataset/bird_or_not"),
            categories: vec!["forest".to_string(), "bird".to_string()],
            query_suffix: "photo".to_string(),
            images_per_category: 30,
            max_image_size: 400,
            throttle_secs: 5,
            download_timeout_secs: 30,
            connectivity: ConnectivityConfig::default(),
            search: SearchConfig::default(),
            valid_fraction: 0.2,
            seed: 42,
            batch_size: 8,
            resize_px: 192,
            fine_tune_passes: 3,
            learning_rate: 0.05,
            weight_decay: 1e-4,
            backbone: BackboneSpec::default(),
            predict_category: "bird".to_string(),
            resume: false,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder for fluent API construction
    ///
    /// # Examples
    ///
    /// ```rust
    /// use imgly_classify::PipelineConfig;
    ///
    /// let config = PipelineConfig::builder()
    ///     .categories(["cat", "dog"])
    ///     .images_per_category(50)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.categories.len(), 2);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load a configuration from a JSON file, filling unspecified fields with defaults
    ///
    /// # Errors
    /// - The file cannot be read
    /// - The JSON is malformed or has wrongly typed fields
    /// - The resulting configuration fails [`PipelineConfig::validate`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            PipelineError::invalid_config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration as pretty-printed JSON
    ///
    /// # Errors
    /// - Serialization failure (not expected for valid configurations)
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::internal(format!("Failed to serialize config: {}", e)))
    }

    /// Search term used for a category
    #[must_use]
    pub fn query_for(&self, category: &str) -> String {
        if self.query_suffix.is_empty() {
            category.to_string()
        } else {
            format!("{} {}", category, self.query_suffix)
        }
    }

    /// Pause applied after each category's downloads
    #[must_use]
    pub fn throttle(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }

    /// Validate all configuration parameters
    ///
    /// # Validation Rules
    ///
    /// - At least one category; each a non-empty single path component, no duplicates
    /// - `valid_fraction` in `0.0..1.0`
    /// - `images_per_category`, `batch_size`, `fine_tune_passes` at least 1
    /// - `resize_px` in `1..=4096`, `max_image_size` at least 1
    /// - `learning_rate` positive and finite, `weight_decay` non-negative
    ///
    /// # Errors
    /// - Any rule above is violated
    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(PipelineError::invalid_config(
                "At least one category is required",
            ));
        }

        for (index, category) in self.categories.iter().enumerate() {
            validate_category(category)?;
            if self.categories.iter().take(index).any(|c| c == category) {
                return Err(PipelineError::invalid_config(format!(
                    "Duplicate category '{}'",
                    category
                )));
            }
        }

        if self.images_per_category == 0 {
            return Err(PipelineError::config_value_error(
                "images per category",
                self.images_per_category,
                ">= 1",
                Some(30),
            ));
        }

        if !(0.0..1.0).contains(&self.valid_fraction) {
            return Err(PipelineError::config_value_error(
                "valid fraction",
                self.valid_fraction,
                "0.0-<1.0",
                Some(0.2),
            ));
        }

        if self.batch_size == 0 {
            return Err(PipelineError::config_value_error(
                "batch size",
                self.batch_size,
                ">= 1",
                Some(8),
            ));
        }

        if self.resize_px == 0 || self.resize_px > 4096 {
            return Err(PipelineError::config_value_error(
                "resize size",
                self.resize_px,
                "1-4096",
                Some(192),
            ));
        }

        if self.max_image_size == 0 {
            return Err(PipelineError::config_value_error(
                "max image size",
                self.max_image_size,
                ">= 1",
                Some(400),
            ));
        }

        if self.fine_tune_passes == 0 {
            return Err(PipelineError::config_value_error(
                "fine-tune passes",
                self.fine_tune_passes,
                ">= 1",
                Some(3),
            ));
        }

        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(PipelineError::config_value_error(
                "learning rate",
                self.learning_rate,
                "> 0.0",
                Some(0.05),
            ));
        }

        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(PipelineError::config_value_error(
                "weight decay",
                self.weight_decay,
                ">= 0.0",
                Some(1e-4),
            ));
        }

        if self.connectivity.timeout_ms == 0 {
            return Err(PipelineError::config_value_error(
                "connectivity timeout (ms)",
                self.connectivity.timeout_ms,
                ">= 1",
                Some(1000),
            ));
        }

        if self.predict_category.trim().is_empty() {
            return Err(PipelineError::invalid_config(
                "Prediction category cannot be empty",
            ));
        }

        Ok(())
    }
}

fn validate_category(category: &str) -> Result<()> {
    if category.trim().is_empty() {
        return Err(PipelineError::invalid_config("Category names cannot be empty"));
    }
    if category == "." || category == ".." || category.contains('/') || category.contains('\\') {
        return Err(PipelineError::invalid_config(format!(
            "Category '{}' must be a single directory name",
            category
        )));
    }
    Ok(())
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Start from an existing configuration
    #[must_use]
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn dataset_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.config.dataset_root = root.into();
        self
    }

    #[must_use]
    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn query_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.config.query_suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn images_per_category(mut self, count: usize) -> Self {
        self.config.images_per_category = count;
        self
    }

    #[must_use]
    pub fn max_image_size(mut self, size: u32) -> Self {
        self.config.max_image_size = size;
        self
    }

    #[must_use]
    pub fn throttle_secs(mut self, secs: u64) -> Self {
        self.config.throttle_secs = secs;
        self
    }

    #[must_use]
    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn connectivity(mut self, address: impl Into<String>, timeout_ms: u64) -> Self {
        self.config.connectivity = ConnectivityConfig {
            address: address.into(),
            timeout_ms,
        };
        self
    }

    #[must_use]
    pub fn search(mut self, search: SearchConfig) -> Self {
        self.config.search = search;
        self
    }

    #[must_use]
    pub fn valid_fraction(mut self, fraction: f64) -> Self {
        self.config.valid_fraction = fraction;
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn resize_px(mut self, size: u32) -> Self {
        self.config.resize_px = size;
        self
    }

    #[must_use]
    pub fn fine_tune_passes(mut self, passes: usize) -> Self {
        self.config.fine_tune_passes = passes;
        self
    }

    #[must_use]
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.config.learning_rate = learning_rate;
        self
    }

    #[must_use]
    pub fn weight_decay(mut self, weight_decay: f32) -> Self {
        self.config.weight_decay = weight_decay;
        self
    }

    #[must_use]
    pub fn backbone(mut self, backbone: BackboneSpec) -> Self {
        self.config.backbone = backbone;
        self
    }

    #[must_use]
    pub fn predict_category<S: Into<String>>(mut self, category: S) -> Self {
        self.config.predict_category = category.into();
        self
    }

    #[must_use]
    pub fn resume(mut self, resume: bool) -> Self {
        self.config.resume = resume;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Validation failure, see [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.categories, vec!["forest", "bird"]);
        assert_eq!(config.images_per_category, 30);
        assert!((config.valid_fraction - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.seed, 42);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.resize_px, 192);
        assert_eq!(config.max_image_size, 400);
        assert_eq!(config.fine_tune_passes, 3);
        assert_eq!(config.throttle(), Duration::from_secs(5));
        assert_eq!(config.connectivity.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_query_for() {
        let config = PipelineConfig::default();
        assert_eq!(config.query_for("bird"), "bird photo");

        let config = PipelineConfig::builder().query_suffix("").build().unwrap();
        assert_eq!(config.query_for("bird"), "bird");
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        assert!(PipelineConfig::builder().valid_fraction(1.0).build().is_err());
        assert!(PipelineConfig::builder().valid_fraction(-0.1).build().is_err());
        assert!(PipelineConfig::builder().batch_size(0).build().is_err());
        assert!(PipelineConfig::builder().fine_tune_passes(0).build().is_err());
        assert!(PipelineConfig::builder().resize_px(0).build().is_err());
        assert!(PipelineConfig::builder().learning_rate(0.0).build().is_err());
        assert!(PipelineConfig::builder().images_per_category(0).build().is_err());
        assert!(PipelineConfig::builder()
            .categories(Vec::<String>::new())
            .build()
            .is_err());
    }

    #[test]
    fn test_category_names_validated() {
        assert!(PipelineConfig::builder().categories(["a/b"]).build().is_err());
        assert!(PipelineConfig::builder().categories([".."]).build().is_err());
        assert!(PipelineConfig::builder().categories([" "]).build().is_err());

        let err = PipelineConfig::builder()
            .categories(["bird", "forest", "bird"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate category 'bird'"));
    }

    #[test]
    fn test_valid_fraction_error_message() {
        let err = PipelineConfig::builder()
            .valid_fraction(1.5)
            .build()
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("valid fraction"));
        assert!(message.contains("1.5"));
        assert!(message.contains("Recommended: 0.2"));
    }

    #[test]
    fn test_json_roundtrip_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "categories": ["cat", "dog"],
                "seed": 7,
                "search": { "provider": "static", "urls": { "cat photo": ["https://example.com/a.jpg"] } },
                "backbone": { "kind": "onnx", "path": "models/resnet18.onnx" }
            }"#,
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.categories, vec!["cat", "dog"]);
        assert_eq!(config.seed, 7);
        assert_eq!(config.batch_size, 8);
        assert_eq!(
            config.backbone,
            BackboneSpec::Onnx {
                path: PathBuf::from("models/resnet18.onnx")
            }
        );
        match &config.search {
            SearchConfig::Static { urls } => assert_eq!(urls.len(), 1),
            other => panic!("unexpected search config: {:?}", other),
        }

        let json = config.to_json_pretty().unwrap();
        let reparsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_duckduckgo_defaults_from_json() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "search": { "provider": "duckduckgo" } }"#).unwrap();
        assert_eq!(config.search, SearchConfig::default());
    }

    #[test]
    fn test_from_json_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.json");
        let err = PipelineConfig::from_json_file(&missing).unwrap_err();
        assert!(err.to_string().contains("read config file"));

        let bad = temp_dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        let err = PipelineConfig::from_json_file(&bad).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));

        let invalid = temp_dir.path().join("invalid.json");
        std::fs::write(&invalid, r#"{ "batch_size": 0 }"#).unwrap();
        assert!(PipelineConfig::from_json_file(&invalid).is_err());
    }

    #[test]
    fn test_safesearch_params() {
        assert_eq!(SafeSearch::Moderate.as_param(), "1");
        assert_eq!(SafeSearch::On.as_param(), "1");
        assert_eq!(SafeSearch::Off.as_param(), "-1");
    }
}
