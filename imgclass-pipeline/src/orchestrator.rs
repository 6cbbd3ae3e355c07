//! Per-item pipeline orchestration
//!
//! Drives one [`ImageTask`] through `Ingesting → Classifying → Filtering` and
//! into exactly one terminal state. Ingest and classify run under their
//! retry policies; the filter runs once. Cancellation is observed only at
//! stage boundaries, so an in-flight stage always completes.
//!
//! Every run produces exactly one [`ExecutionOutcome`]. Failed runs publish a
//! [`FailureNotice`]; a sink error is logged and otherwise ignored.

use crate::classifier::{ClassifierAdapter, InferenceEndpoint};
use crate::codec::Codec;
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, StageError};
use crate::filter::ConfidenceFilter;
use crate::notify::{FailureNotice, NotificationSink};
use crate::retry::{retry_stage, RetryPolicy, StageReport};
use crate::storage::ObjectStore;
use crate::types::{
    ExecutionOutcome, FilterDecision, FinalStatus, ImageTask, PipelineState, Stage, StageAttempts,
};
use chrono::Utc;
use imgclass_common::events::{EventBus, PipelineEvent};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Single-item pipeline runner
///
/// Holds no per-item state, so one instance can serve any number of
/// concurrent runs.
pub struct Orchestrator {
    codec: Codec,
    classifier: ClassifierAdapter,
    filter: ConfidenceFilter,
    ingest_policy: RetryPolicy,
    classify_policy: RetryPolicy,
    stage_timeout: Option<Duration>,
    notifier: Arc<dyn NotificationSink>,
    event_bus: Option<EventBus>,
}

impl Orchestrator {
    /// Build from validated configuration and injected adapters
    pub fn new(
        config: &PipelineConfig,
        store: Arc<dyn ObjectStore>,
        endpoint: Arc<dyn InferenceEndpoint>,
        notifier: Arc<dyn NotificationSink>,
    ) -> imgclass_common::Result<Self> {
        config.validate()?;

        Ok(Self {
            codec: Codec::new(store),
            classifier: ClassifierAdapter::new(endpoint, config.labels.clone()),
            filter: ConfidenceFilter::new(config.threshold)?,
            ingest_policy: config.retry.ingest.clone(),
            classify_policy: config.retry.classify.clone(),
            stage_timeout: Some(config.stage_timeout()),
            notifier,
            event_bus: None,
        })
    }

    /// Build with the adapters described by `config`
    pub fn from_config(config: &PipelineConfig) -> imgclass_common::Result<Self> {
        Self::new(
            config,
            config.object_store()?,
            config.inference_endpoint()?,
            config.notification_sink()?,
        )
    }

    /// Publish progress events on `bus`
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Run one item to a terminal state
    pub async fn run(&self, task: ImageTask, cancel: &CancellationToken) -> ExecutionOutcome {
        info!(task_id = %task.id, location = %task.location, "Pipeline run started");

        let outcome = self.execute(task, cancel).await;
        self.finish(&outcome).await;
        outcome
    }

    async fn execute(&self, task: ImageTask, cancel: &CancellationToken) -> ExecutionOutcome {
        let mut run = ItemRun::new(task);

        // Ingest
        if cancel.is_cancelled() {
            return run.cancelled(Stage::Ingest);
        }
        let report = self
            .invoke(Stage::Ingest, &self.ingest_policy, &run.task.id, |_| {
                self.codec.ingest(&run.task)
            })
            .await;
        run.record(Stage::Ingest, report.attempts);
        match report.result {
            Ok(encoded) => run.task.encoded_payload = encoded.encoded_payload,
            Err(failure) => return run.failed(Stage::Ingest, failure.error, None),
        }
        run.advance(Stage::Classify.state());

        // Classify
        if cancel.is_cancelled() {
            return run.cancelled(Stage::Classify);
        }
        let report = self
            .invoke(Stage::Classify, &self.classify_policy, &run.task.id, |_| {
                self.classifier.classify(&run.task)
            })
            .await;
        run.record(Stage::Classify, report.attempts);
        let scores = match report.result {
            Ok(scores) => scores,
            Err(failure) => return run.failed(Stage::Classify, failure.error, None),
        };
        run.inferences = Some(scores.scores());
        run.advance(Stage::Filter.state());

        // Filter: deterministic, never retried
        if cancel.is_cancelled() {
            return run.cancelled(Stage::Filter);
        }
        self.emit(PipelineEvent::StageStarted {
            task_id: run.task.id.clone(),
            stage: Stage::Filter.to_string(),
            timestamp: Utc::now(),
        });
        let decision = self.filter.decide(&run.task.id, &scores);
        run.record(Stage::Filter, 1);
        self.emit(PipelineEvent::StageCompleted {
            task_id: run.task.id.clone(),
            stage: Stage::Filter.to_string(),
            attempts: 1,
            success: decision.accepted,
            timestamp: Utc::now(),
        });

        if !decision.accepted {
            let reason = decision.reason.clone().unwrap_or_default();
            let error = StageError::new(ErrorKind::ConfidenceBelowThreshold, reason);
            return run.failed(Stage::Filter, error, Some(decision));
        }

        run.succeeded(decision)
    }

    /// One retried stage invocation, bracketed by progress events
    async fn invoke<F, Fut, T>(
        &self,
        stage: Stage,
        policy: &RetryPolicy,
        task_id: &str,
        operation: F,
    ) -> StageReport<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        self.emit(PipelineEvent::StageStarted {
            task_id: task_id.to_string(),
            stage: stage.to_string(),
            timestamp: Utc::now(),
        });

        let report = retry_stage(stage, policy, self.stage_timeout, operation, |notice| {
            self.emit(PipelineEvent::StageRetrying {
                task_id: task_id.to_string(),
                stage: notice.stage.to_string(),
                attempt: notice.attempt,
                error_kind: notice.error.kind.to_string(),
                backoff_ms: notice.delay.as_millis() as u64,
                timestamp: Utc::now(),
            });
        })
        .await;

        self.emit(PipelineEvent::StageCompleted {
            task_id: task_id.to_string(),
            stage: stage.to_string(),
            attempts: report.attempts,
            success: report.result.is_ok(),
            timestamp: Utc::now(),
        });

        report
    }

    async fn finish(&self, outcome: &ExecutionOutcome) {
        self.emit(PipelineEvent::ItemFinished {
            task_id: outcome.task_id.clone(),
            status: outcome.final_status.as_str().to_string(),
            error_kind: outcome.error_kind.map(|k| k.to_string()),
            timestamp: Utc::now(),
        });

        let Some(notice) = FailureNotice::from_outcome(outcome) else {
            info!(
                task_id = %outcome.task_id,
                top_label = outcome.decision.as_ref().map(|d| d.top_label.as_str()).unwrap_or(""),
                top_score = outcome.decision.as_ref().map(|d| d.top_score).unwrap_or(0.0),
                "Pipeline run succeeded"
            );
            return;
        };

        warn!(
            task_id = %outcome.task_id,
            error_kind = %notice.error_kind,
            stage = ?notice.stage,
            attempts = notice.attempts,
            reason = notice.reason.as_deref().unwrap_or(""),
            "Pipeline run failed"
        );

        if let Err(e) = self.notifier.publish(&notice).await {
            warn!(task_id = %outcome.task_id, error = %e, "Failed to publish failure notice");
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }
}

/// Mutable bookkeeping for one run
///
/// `task.status` is the run's state; it is only changed through `advance`.
struct ItemRun {
    task: ImageTask,
    stages: Vec<StageAttempts>,
    inferences: Option<Vec<f64>>,
}

impl ItemRun {
    fn new(mut task: ImageTask) -> Self {
        task.status = Stage::Ingest.state();
        Self {
            task,
            stages: Vec::with_capacity(Stage::ORDER.len()),
            inferences: None,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.task.status.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.task.status,
            next
        );
        debug!(task_id = %self.task.id, from = ?self.task.status, to = ?next, "State transition");
        self.task.status = next;
    }

    fn record(&mut self, stage: Stage, attempts: u32) {
        self.stages.push(StageAttempts { stage, attempts });
    }

    /// Cancellation is not a stage failure, so no stage is blamed
    fn cancelled(self, stage: Stage) -> ExecutionOutcome {
        info!(task_id = %self.task.id, stage = %stage, "Cancellation observed, not starting stage");
        let error = StageError::cancelled(format!("Cancelled before {} stage", stage));
        self.finish_failed(None, error, None)
    }

    fn failed(self, stage: Stage, error: StageError, decision: Option<FilterDecision>) -> ExecutionOutcome {
        self.finish_failed(Some(stage), error, decision)
    }

    fn finish_failed(
        mut self,
        failed_stage: Option<Stage>,
        error: StageError,
        decision: Option<FilterDecision>,
    ) -> ExecutionOutcome {
        self.advance(PipelineState::Failed);
        ExecutionOutcome {
            task_id: self.task.id,
            location: self.task.location,
            stages_completed: self.stages,
            final_status: FinalStatus::Failed,
            failed_stage,
            error_kind: Some(error.kind),
            reason: Some(error.message),
            decision,
            inferences: self.inferences,
        }
    }

    fn succeeded(mut self, decision: FilterDecision) -> ExecutionOutcome {
        self.advance(PipelineState::Succeeded);
        ExecutionOutcome {
            task_id: self.task.id,
            location: self.task.location,
            stages_completed: self.stages,
            final_status: FinalStatus::Succeeded,
            failed_stage: None,
            error_kind: None,
            reason: None,
            decision: Some(decision),
            inferences: self.inferences,
        }
    }
}
