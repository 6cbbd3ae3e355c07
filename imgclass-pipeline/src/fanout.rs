//! Batch fan-out
//!
//! Runs one orchestrator per item with at most `concurrency` runs in flight
//! (`futures::stream::buffer_unordered`). Items never share mutable state:
//! each run yields its outcome, and the report is assembled once every run
//! has finished. A failed item never fails its siblings or the batch.

use crate::orchestrator::Orchestrator;
use crate::types::{ExecutionOutcome, ImageTask};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use imgclass_common::events::{EventBus, PipelineEvent};
use imgclass_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Aggregate status of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    AllSucceeded,
    PartiallyFailed,
    AllFailed,
    /// No items were submitted
    Empty,
}

impl BatchStatus {
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (0, 0) => BatchStatus::Empty,
            (_, 0) => BatchStatus::AllSucceeded,
            (0, _) => BatchStatus::AllFailed,
            _ => BatchStatus::PartiallyFailed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::AllSucceeded => "AllSucceeded",
            BatchStatus::PartiallyFailed => "PartiallyFailed",
            BatchStatus::AllFailed => "AllFailed",
            BatchStatus::Empty => "Empty",
        }
    }
}

/// Outcome of a batch, one entry per submitted item in submission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub status: BatchStatus,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<ExecutionOutcome>,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: Vec<ExecutionOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - succeeded;

        Self {
            status: BatchStatus::from_counts(succeeded, failed),
            total: outcomes.len(),
            succeeded,
            failed,
            outcomes,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExecutionOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Runs batches of items with bounded concurrency
pub struct FanOutCoordinator {
    orchestrator: Arc<Orchestrator>,
    concurrency: usize,
    event_bus: Option<EventBus>,
}

impl FanOutCoordinator {
    /// `concurrency` must be at least 1
    pub fn new(orchestrator: Arc<Orchestrator>, concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }

        Ok(Self {
            orchestrator,
            concurrency,
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Run every task to a terminal state and aggregate the outcomes
    ///
    /// Cancellation stops items from starting further stages; every item
    /// still gets an outcome.
    pub async fn run_batch(&self, tasks: Vec<ImageTask>, cancel: &CancellationToken) -> BatchReport {
        let total = tasks.len();

        tracing::info!(items = total, concurrency = self.concurrency, "Batch started");

        let completed = Arc::new(AtomicUsize::new(0));

        let mut indexed: Vec<(usize, ExecutionOutcome)> = stream::iter(tasks.into_iter().enumerate())
            .map(|(index, task)| {
                let orchestrator = Arc::clone(&self.orchestrator);
                let completed = Arc::clone(&completed);
                let cancel = cancel.clone();

                async move {
                    let outcome = orchestrator.run(task, &cancel).await;
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;

                    tracing::debug!(
                        item_index = index,
                        task_id = %outcome.task_id,
                        status = outcome.final_status.as_str(),
                        done,
                        total,
                        "Item finished"
                    );

                    (index, outcome)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        indexed.sort_by_key(|(index, _)| *index);
        let report = BatchReport::from_outcomes(indexed.into_iter().map(|(_, o)| o).collect());

        tracing::info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            status = report.status.as_str(),
            "Batch finished"
        );

        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(PipelineEvent::BatchFinished {
                total: report.total,
                succeeded: report.succeeded,
                failed: report.failed,
                status: report.status.as_str().to_string(),
                timestamp: Utc::now(),
            });
        }

        report
    }
}
