//! Mock classifier for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use verity_inference::mock::MockClassifier;
//!
//! let classifier = MockClassifier::new()
//!     .with_probability("a.png", 0.9)
//!     .with_default_probability(0.1);
//!
//! // ... run the pipeline ...
//!
//! assert_eq!(classifier.batch_sizes(), vec![2, 1]);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use verity_core::defaults::{INFERENCE_BATCH_SIZE, PREDICTION_THRESHOLD};
use verity_core::{Classifier, Error, Prediction, PreparedImage, Result};

use crate::prediction::{ensure_valid_batch, from_probability};

/// Mock classifier with scripted probabilities and failures.
#[derive(Clone)]
pub struct MockClassifier {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<Vec<String>>>>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    probabilities: HashMap<String, f32>,
    default_probability: f32,
    threshold: f32,
    max_batch_size: usize,
    fail_always: bool,
    fail_for: HashSet<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            probabilities: HashMap::new(),
            default_probability: 0.5,
            threshold: PREDICTION_THRESHOLD,
            max_batch_size: INFERENCE_BATCH_SIZE,
            fail_always: false,
            fail_for: HashSet::new(),
        }
    }
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClassifier {
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A classifier whose every call fails.
    pub fn failing() -> Self {
        let mut mock = Self::new();
        Arc::make_mut(&mut mock.config).fail_always = true;
        mock
    }

    /// Probability returned for `image`.
    pub fn with_probability(mut self, image: impl Into<String>, p: f32) -> Self {
        Arc::make_mut(&mut self.config)
            .probabilities
            .insert(image.into(), p);
        self
    }

    /// Probability returned for images without an explicit mapping.
    pub fn with_default_probability(mut self, p: f32) -> Self {
        Arc::make_mut(&mut self.config).default_probability = p;
        self
    }

    /// Fail any batch containing `image`.
    pub fn with_failure_for(mut self, image: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .fail_for
            .insert(image.into());
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        Arc::make_mut(&mut self.config).max_batch_size = size;
        self
    }

    /// Image names of every batch received, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.call_log.lock().unwrap().clone()
    }

    /// Size of every batch received, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.call_log.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, batch: &[PreparedImage]) -> Result<Vec<Prediction>> {
        self.call_log
            .lock()
            .unwrap()
            .push(batch.iter().map(|i| i.name.clone()).collect());

        ensure_valid_batch(batch.len(), self.config.max_batch_size)?;
        if self.config.fail_always {
            return Err(Error::Inference("Mock classifier failure".to_string()));
        }
        if let Some(image) = batch.iter().find(|i| self.config.fail_for.contains(&i.name)) {
            return Err(Error::Inference(format!(
                "Mock classifier failure for {}",
                image.name
            )));
        }

        batch
            .iter()
            .map(|image| {
                let p = self
                    .config
                    .probabilities
                    .get(&image.name)
                    .copied()
                    .unwrap_or(self.config.default_probability);
                from_probability(p, self.config.threshold)
            })
            .collect()
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
