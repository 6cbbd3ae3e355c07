//! Classify stage: encoded payload → labeled scores
//!
//! The remote model is reached through [`InferenceEndpoint`], injected at
//! construction. The adapter owns the contract checks on the raw output:
//! one finite score in `[0, 1]` per vocabulary label, in vocabulary order.

use crate::codec;
use crate::error::StageError;
use crate::types::{ImageTask, LabeledScore, LabeledScores};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Remote inference capability: image bytes in, raw score vector out
#[async_trait]
pub trait InferenceEndpoint: Send + Sync {
    async fn classify(&self, image: &[u8]) -> Result<Vec<f64>, StageError>;
}

/// Map a raw vector onto the vocabulary
///
/// Fails with `MalformedResponseError` on length mismatch or any score that
/// is not a finite number in `[0, 1]`. Scores need not sum to 1.
pub fn label_scores(vocabulary: &[String], raw: &[f64]) -> Result<LabeledScores, StageError> {
    if raw.len() != vocabulary.len() {
        return Err(StageError::malformed(format!(
            "Endpoint returned {} scores for {} labels",
            raw.len(),
            vocabulary.len()
        )));
    }

    let entries = vocabulary
        .iter()
        .zip(raw)
        .map(|(label, &score)| {
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(StageError::malformed(format!(
                    "Score for '{}' out of range: {}",
                    label, score
                )));
            }
            Ok(LabeledScore {
                label: label.clone(),
                score,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LabeledScores { entries })
}

/// Classify stage
pub struct ClassifierAdapter {
    endpoint: Arc<dyn InferenceEndpoint>,
    vocabulary: Vec<String>,
}

impl ClassifierAdapter {
    pub fn new(endpoint: Arc<dyn InferenceEndpoint>, vocabulary: Vec<String>) -> Self {
        Self {
            endpoint,
            vocabulary,
        }
    }

    pub async fn classify(&self, task: &ImageTask) -> Result<LabeledScores, StageError> {
        let payload = task
            .encoded_payload
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| StageError::malformed(format!("Task {} has no encoded payload", task.id)))?;

        let image = codec::decode(payload)
            .map_err(|e| StageError::malformed(format!("Payload is not valid base64: {}", e)))?;

        let raw = self.endpoint.classify(&image).await?;
        let scores = label_scores(&self.vocabulary, &raw)?;

        if let Some(top) = scores.top() {
            tracing::debug!(
                task_id = %task.id,
                status = ?task.status,
                top_label = %top.label,
                top_score = top.score,
                "Classification complete"
            );
        }

        Ok(scores)
    }
}

// ============================================================================
// HTTP endpoint
// ============================================================================

/// Default timeout for inference requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default content type of the posted image
pub const DEFAULT_CONTENT_TYPE: &str = "image/png";

/// Spaces requests at least `min_interval` apart
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with rate limit
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Inference endpoint reached over HTTP
///
/// Posts the raw image with the configured content type and expects a JSON
/// array of numbers back.
pub struct HttpInferenceEndpoint {
    http_client: reqwest::Client,
    url: String,
    content_type: String,
    timeout: Duration,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl HttpInferenceEndpoint {
    pub fn new(url: impl Into<String>) -> Result<Self, StageError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| StageError::transient_service(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            timeout: DEFAULT_TIMEOUT,
            rate_limiter: None,
        })
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Per-request timeout; an elapsed request fails with `Timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Space requests at least `min_interval_ms` apart (0 disables)
    pub fn with_min_interval_ms(mut self, min_interval_ms: u64) -> Self {
        self.rate_limiter = (min_interval_ms > 0).then(|| Arc::new(RateLimiter::new(min_interval_ms)));
        self
    }
}

/// Parse an endpoint response body into a score vector
pub fn parse_inference_body(body: &[u8]) -> Result<Vec<f64>, StageError> {
    let values: Vec<serde_json::Value> = serde_json::from_slice(body)
        .map_err(|e| StageError::malformed(format!("Response is not a JSON array: {}", e)))?;

    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64()
                .ok_or_else(|| StageError::malformed(format!("Non-numeric score at index {}: {}", i, v)))
        })
        .collect()
}

#[async_trait]
impl InferenceEndpoint for HttpInferenceEndpoint {
    async fn classify(&self, image: &[u8]) -> Result<Vec<f64>, StageError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.wait().await;
        }

        tracing::debug!(url = %self.url, bytes = image.len(), "Invoking inference endpoint");

        let response = self
            .http_client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, self.content_type.as_str())
            .timeout(self.timeout)
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StageError::timeout(format!("Inference request timed out: {}", e))
                } else {
                    StageError::transient_service(format!("Inference request failed: {}", e))
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(StageError::throttling("Inference endpoint rate limit exceeded"));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StageError::transient_service(format!(
                "Inference endpoint returned {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| StageError::transient_service(format!("Body read failed: {}", e)))?;

        parse_inference_body(&body)
    }
}
