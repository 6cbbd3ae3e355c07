//! Pipeline configuration
//!
//! Loaded from TOML (see `imgclass_common::config` for file resolution).
//! Every field has a default, so partial files are fine. All values are
//! validated once, before any orchestrator is built.

use crate::classifier::{HttpInferenceEndpoint, InferenceEndpoint, DEFAULT_CONTENT_TYPE};
use crate::filter::DEFAULT_THRESHOLD;
use crate::notify::{LoggingNotificationSink, NotificationSink, WebhookNotificationSink};
use crate::retry::RetryPolicy;
use crate::storage::{FsObjectStore, HttpObjectStore, ObjectStore};
use imgclass_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn default_labels() -> Vec<String> {
    vec!["bicycle".to_string(), "motorcycle".to_string()]
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum top score for acceptance, in `[0, 1]`
    pub threshold: f64,
    /// Label vocabulary, positionally aligned with the endpoint output
    pub labels: Vec<String>,
    /// Maximum items in flight per batch
    pub concurrency: usize,
    /// Per-invocation timeout for the ingest and classify stages
    pub stage_timeout_ms: u64,
    pub storage: StorageConfig,
    pub endpoint: EndpointConfig,
    pub notification: NotificationConfig,
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            labels: default_labels(),
            concurrency: 4,
            stage_timeout_ms: 30_000,
            storage: StorageConfig::default(),
            endpoint: EndpointConfig::default(),
            notification: NotificationConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Where source images live; `base_url` wins when both are set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<PathBuf>,
    pub base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: Some(PathBuf::from("./data")),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub url: String,
    pub content_type: String,
    /// Minimum spacing between requests, 0 disables
    pub min_interval_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/invocations".to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            min_interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Failure notices are POSTed here; logged only when unset
    pub webhook_url: Option<String>,
}

/// Per-stage retry specifications
///
/// The filter stage is deterministic and always runs exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryPolicy::ingest_default")]
    pub ingest: RetryPolicy,
    #[serde(default = "RetryPolicy::classify_default")]
    pub classify: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            ingest: RetryPolicy::ingest_default(),
            classify: RetryPolicy::classify_default(),
        }
    }
}

impl PipelineConfig {
    /// Check every value; the first problem is reported
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::Config(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if self.labels.is_empty() {
            return Err(Error::Config("labels must not be empty".to_string()));
        }
        if self.labels.iter().any(|l| l.trim().is_empty()) {
            return Err(Error::Config("labels must not contain blank entries".to_string()));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.stage_timeout_ms == 0 {
            return Err(Error::Config("stage_timeout_ms must be positive".to_string()));
        }
        if self.storage.root.is_none() && self.storage.base_url.is_none() {
            return Err(Error::Config(
                "storage needs either `root` or `base_url`".to_string(),
            ));
        }
        self.retry
            .ingest
            .validate()
            .map_err(|e| Error::Config(format!("retry.ingest: {}", e)))?;
        self.retry
            .classify
            .validate()
            .map_err(|e| Error::Config(format!("retry.classify: {}", e)))?;
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// Object store described by `[storage]`
    pub fn object_store(&self) -> Result<Arc<dyn ObjectStore>> {
        if let Some(url) = &self.storage.base_url {
            let store = HttpObjectStore::new(url.clone())
                .map_err(|e| Error::Config(format!("HTTP object store: {}", e)))?;
            return Ok(Arc::new(store));
        }

        match &self.storage.root {
            Some(root) => Ok(Arc::new(FsObjectStore::new(root.clone()))),
            None => Err(Error::Config("storage needs either `root` or `base_url`".to_string())),
        }
    }

    /// Inference endpoint described by `[endpoint]`
    pub fn inference_endpoint(&self) -> Result<Arc<dyn InferenceEndpoint>> {
        let endpoint = HttpInferenceEndpoint::new(self.endpoint.url.clone())
            .map_err(|e| Error::Config(format!("Inference endpoint: {}", e)))?
            .with_content_type(self.endpoint.content_type.clone())
            .with_timeout(self.stage_timeout())
            .with_min_interval_ms(self.endpoint.min_interval_ms);
        Ok(Arc::new(endpoint))
    }

    /// Notification sink described by `[notification]`
    pub fn notification_sink(&self) -> Result<Arc<dyn NotificationSink>> {
        match &self.notification.webhook_url {
            Some(url) => {
                let sink = WebhookNotificationSink::new(url.clone())
                    .map_err(|e| Error::Config(format!("Webhook sink: {}", e)))?;
                Ok(Arc::new(sink))
            }
            None => Ok(Arc::new(LoggingNotificationSink)),
        }
    }
}
