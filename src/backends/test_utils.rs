//! Mock backbones for testing training and prediction without real models

use super::{check_input_shape, Backbone};
use crate::error::{PipelineError, Result};
use instant::Duration;
use ndarray::{s, Array2, Array4};
use std::sync::{Arc, Mutex};

/// Backbone whose features are the per-channel means of the image
///
/// Images of clearly different colours become linearly separable, which is all
/// the head training tests need.
#[derive(Debug, Clone)]
pub struct MockBackbone {
    input_size: u32,
    initialized: bool,
    should_fail_init: bool,
    should_fail_extract: bool,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl MockBackbone {
    #[must_use]
    pub fn new(input_size: u32) -> Self {
        Self {
            input_size,
            initialized: false,
            should_fail_init: false,
            should_fail_extract: false,
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A backbone that fails in `initialize`
    #[must_use]
    pub fn new_failing_init(input_size: u32) -> Self {
        let mut backbone = Self::new(input_size);
        backbone.should_fail_init = true;
        backbone
    }

    /// A backbone that fails in `extract`
    #[must_use]
    pub fn new_failing_extract(input_size: u32) -> Self {
        let mut backbone = Self::new(input_size);
        backbone.should_fail_extract = true;
        backbone
    }

    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }
}

impl Backbone for MockBackbone {
    fn name(&self) -> &str {
        "mock"
    }

    fn initialize(&mut self) -> Result<Option<Duration>> {
        self.record_call("initialize");
        if self.should_fail_init {
            return Err(PipelineError::model("Mock backbone initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(5)))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn feature_dim(&self) -> usize {
        3
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn extract(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        self.record_call("extract");
        if !self.initialized {
            return Err(PipelineError::model("Mock backbone not initialized"));
        }
        if self.should_fail_extract {
            return Err(PipelineError::model("Mock backbone extraction failed"));
        }
        check_input_shape(batch, self.input_size)?;

        let n = batch.dim().0;
        let mut features = Array2::<f32>::zeros((n, 3));
        for index in 0..n {
            for channel in 0..3 {
                features[[index, channel]] = batch
                    .slice(s![index, channel, .., ..])
                    .mean()
                    .unwrap_or(0.0);
            }
        }
        Ok(features)
    }
}
