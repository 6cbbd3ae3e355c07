//! Terminal-failure notifications
//!
//! Every failed item run publishes one [`FailureNotice`]. Publishing is
//! best-effort: a sink error is logged by the orchestrator and never changes
//! the item's outcome.

use crate::error::ErrorKind;
use crate::types::{ExecutionOutcome, Stage, StorageLocation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Payload published for a failed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub task_id: String,
    pub location: StorageLocation,
    pub error_kind: ErrorKind,
    /// Stage that failed, if one was invoked
    pub stage: Option<Stage>,
    pub attempts: u32,
    pub reason: Option<String>,
    /// Decision inputs, present for threshold rejections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl FailureNotice {
    /// Build from a failed outcome; `None` for successful ones
    pub fn from_outcome(outcome: &ExecutionOutcome) -> Option<Self> {
        let error_kind = outcome.error_kind?;
        let stage = outcome.failed_stage;
        let decision = outcome.decision.as_ref();

        Some(Self {
            task_id: outcome.task_id.clone(),
            location: outcome.location.clone(),
            error_kind,
            stage,
            attempts: stage.and_then(|s| outcome.attempts_for(s)).unwrap_or(0),
            reason: outcome.reason.clone(),
            top_label: decision.map(|d| d.top_label.clone()),
            top_score: decision.map(|d| d.top_score),
            threshold: decision.map(|d| d.threshold),
            timestamp: Utc::now(),
        })
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification transport error: {0}")]
    Transport(String),

    #[error("Notification rejected with status {0}")]
    Rejected(u16),
}

/// Receiver of terminal-failure notices
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, notice: &FailureNotice) -> Result<(), NotifyError>;
}

/// Reports failures through the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn publish(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        tracing::error!(
            task_id = %notice.task_id,
            location = %notice.location,
            error_kind = %notice.error_kind,
            stage = ?notice.stage,
            attempts = notice.attempts,
            reason = notice.reason.as_deref().unwrap_or(""),
            top_label = ?notice.top_label,
            top_score = ?notice.top_score,
            threshold = ?notice.threshold,
            "Pipeline run failed"
        );
        Ok(())
    }
}

/// Default timeout for webhook deliveries
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs each notice as JSON to a webhook URL
pub struct WebhookNotificationSink {
    http_client: reqwest::Client,
    url: String,
}

impl WebhookNotificationSink {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn publish(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }

        tracing::debug!(task_id = %notice.task_id, url = %self.url, "Failure notice delivered");
        Ok(())
    }
}
