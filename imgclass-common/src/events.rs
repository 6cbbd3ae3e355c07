//! Pipeline progress events and the broadcast event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Pipeline progress events
///
/// Stage and error identifiers are carried as strings so subscribers do not
/// need the pipeline crate's types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A stage invocation is about to start (first attempt)
    StageStarted {
        task_id: String,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage attempt failed with a retryable error and will be retried
    StageRetrying {
        task_id: String,
        stage: String,
        /// 1-based number of the attempt that failed
        attempt: u32,
        error_kind: String,
        backoff_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A stage reached its terminal result
    StageCompleted {
        task_id: String,
        stage: String,
        attempts: u32,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// One item's run finished
    ItemFinished {
        task_id: String,
        /// "Succeeded" or "Failed"
        status: String,
        error_kind: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A batch finished
    BatchFinished {
        total: usize,
        succeeded: usize,
        failed: usize,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for pipeline events
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}
