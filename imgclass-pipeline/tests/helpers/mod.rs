//! Test Helper Utilities
//!
//! Scripted adapters for driving the pipeline without storage or a model

#![allow(dead_code)]

pub mod http_stub;
pub mod log_capture;

pub use log_capture::{capture_logs, LogCapture};

use async_trait::async_trait;
use imgclass_pipeline::classifier::InferenceEndpoint;
use imgclass_pipeline::config::PipelineConfig;
use imgclass_pipeline::error::{ErrorKind, StageError};
use imgclass_pipeline::notify::{FailureNotice, NotificationSink, NotifyError};
use imgclass_pipeline::retry::Jitter;
use imgclass_pipeline::storage::ObjectStore;
use imgclass_pipeline::types::StorageLocation;
use imgclass_pipeline::Orchestrator;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory object store keyed by `bucket/key`
#[derive(Default)]
pub struct MemoryStore {
    objects: HashMap<String, Vec<u8>>,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, bucket: &str, key: &str, bytes: &[u8]) -> Self {
        self.objects.insert(format!("{}/{}", bucket, key), bytes.to_vec());
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, location: &StorageLocation) -> Result<Vec<u8>, StageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.objects
            .get(&location.to_string())
            .cloned()
            .ok_or_else(|| StageError::not_found(format!("No such object: {}", location)))
    }
}

/// Inference endpoint answering from a script, then by image content
///
/// Scripted results are consumed first, one per call. After that the
/// response registered for the exact image bytes is returned, or the
/// fallback vector.
pub struct ScriptedEndpoint {
    script: Mutex<VecDeque<Result<Vec<f64>, StageError>>>,
    responses: HashMap<Vec<u8>, Vec<f64>>,
    fallback: Vec<f64>,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedEndpoint {
    pub fn returning(fallback: Vec<f64>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            responses: HashMap::new(),
            fallback,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` calls with `kind`
    pub fn failing_first(self, count: usize, kind: ErrorKind) -> Self {
        {
            let mut script = self.script.lock().unwrap();
            for i in 0..count {
                script.push_back(Err(StageError::new(kind, format!("scripted failure {}", i + 1))));
            }
        }
        self
    }

    pub fn with_response(mut self, image: &[u8], scores: Vec<f64>) -> Self {
        self.responses.insert(image.to_vec(), scores);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceEndpoint for ScriptedEndpoint {
    async fn classify(&self, image: &[u8]) -> Result<Vec<f64>, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        let result = match scripted {
            Some(result) => result,
            None => Ok(self
                .responses
                .get(image)
                .cloned()
                .unwrap_or_else(|| self.fallback.clone())),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Collects every published notice
#[derive(Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<FailureNotice>>,
}

impl RecordingSink {
    pub fn notices(&self) -> Vec<FailureNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// Default configuration with deterministic backoff
pub fn test_config(threshold: f64) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.threshold = threshold;
    config.retry.ingest.jitter = Jitter::None;
    config.retry.classify.jitter = Jitter::None;
    config
}

pub fn build_orchestrator(
    config: &PipelineConfig,
    store: Arc<dyn ObjectStore>,
    endpoint: Arc<dyn InferenceEndpoint>,
    sink: Arc<dyn NotificationSink>,
) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(config, store, endpoint, sink).expect("valid test configuration"))
}
