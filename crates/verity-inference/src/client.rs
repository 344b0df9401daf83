//! HTTP classifier backend.
//!
//! Talks to a model server exposing the TensorFlow Serving REST predict API:
//! `POST {base}/v1/models/{model}:predict` with base64 image instances,
//! answering one single-element probability vector per instance.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use verity_core::defaults::{
    INFERENCE_BATCH_SIZE, INFERENCE_MODEL, INFERENCE_TIMEOUT_SECS, INFERENCE_URL,
    PREDICTION_THRESHOLD,
};
use verity_core::{Classifier, Error, Prediction, PreparedImage, Result};

use crate::prediction::{ensure_valid_batch, from_probability};

/// Classifier configuration.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub base_url: String,
    pub model: String,
    pub threshold: f32,
    pub timeout_secs: u64,
    pub max_batch_size: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: INFERENCE_URL.to_string(),
            model: INFERENCE_MODEL.to_string(),
            threshold: PREDICTION_THRESHOLD,
            timeout_secs: INFERENCE_TIMEOUT_SECS,
            max_batch_size: INFERENCE_BATCH_SIZE,
        }
    }
}

impl ClassifierConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `INFERENCE_URL` | `http://localhost:8501` | Model server base URL |
    /// | `INFERENCE_MODEL` | `ai_vs_real_cnn` | Served model name |
    /// | `INFERENCE_THRESHOLD` | `0.40` | Probability at or above which an image is AI generated |
    /// | `INFERENCE_TIMEOUT_SECS` | `120` | Request timeout |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("INFERENCE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("INFERENCE_MODEL") {
            config.model = model;
        }
        if let Some(t) = std::env::var("INFERENCE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
        {
            if (0.0..=1.0).contains(&t) {
                config.threshold = t;
            } else {
                warn!(
                    subsystem = "inference",
                    threshold = t,
                    "INFERENCE_THRESHOLD outside [0, 1], using default"
                );
            }
        }
        if let Some(secs) = std::env::var("INFERENCE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.timeout_secs = secs;
        }
        config
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }
}

/// Classifier backed by a remote model server.
pub struct HttpClassifier {
    config: ClassifierConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct PredictRequest {
    instances: Vec<Instance>,
}

#[derive(Serialize)]
struct Instance {
    b64: String,
}

#[derive(Deserialize)]
struct PredictResponse {
    predictions: Vec<Vec<f32>>,
}

impl HttpClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build inference client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ClassifierConfig::from_env())
    }

    fn predict_url(&self) -> String {
        format!(
            "{}/v1/models/{}:predict",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, batch: &[PreparedImage]) -> Result<Vec<Prediction>> {
        ensure_valid_batch(batch.len(), self.config.max_batch_size)?;
        let start = Instant::now();

        let engine = base64::engine::general_purpose::STANDARD;
        let request = PredictRequest {
            instances: batch
                .iter()
                .map(|image| Instance {
                    b64: engine.encode(&image.data),
                })
                .collect(),
        };

        let response = self
            .client
            .post(self.predict_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Inference request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Inference API returned {}: {}",
                status, body
            )));
        }

        let result: PredictResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse inference response: {}", e)))?;

        if result.predictions.len() != batch.len() {
            return Err(Error::Inference(format!(
                "Model returned {} predictions for {} images",
                result.predictions.len(),
                batch.len()
            )));
        }

        let predictions = result
            .predictions
            .iter()
            .map(|row| {
                let p = row.first().copied().ok_or_else(|| {
                    Error::Inference("Model returned an empty prediction".to_string())
                })?;
                from_probability(p, self.config.threshold)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            subsystem = "inference",
            component = "classifier",
            op = "classify",
            model = %self.config.model,
            image_count = batch.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch classified"
        );
        Ok(predictions)
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClassifierConfig::default();
        assert_eq!(config.base_url, INFERENCE_URL);
        assert_eq!(config.model, "ai_vs_real_cnn");
        assert_eq!(config.threshold, 0.40);
        assert_eq!(config.max_batch_size, 2);
    }

    #[test]
    fn test_predict_url_trims_slash() {
        let classifier =
            HttpClassifier::new(ClassifierConfig::default().with_base_url("http://tf:8501/"))
                .unwrap();
        assert_eq!(
            classifier.predict_url(),
            "http://tf:8501/v1/models/ai_vs_real_cnn:predict"
        );
    }

    #[test]
    fn test_predict_request_serialization() {
        let request = PredictRequest {
            instances: vec![Instance {
                b64: "aGVsbG8=".to_string(),
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["instances"][0]["b64"], "aGVsbG8=");
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected_before_request() {
        let classifier = HttpClassifier::new(
            ClassifierConfig::default().with_base_url("http://127.0.0.1:9"),
        )
        .unwrap();
        let image = PreparedImage {
            name: "a.png".to_string(),
            mime_type: "image/png".to_string(),
            data: vec![1],
        };
        let err = classifier
            .classify(&[image.clone(), image.clone(), image])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
