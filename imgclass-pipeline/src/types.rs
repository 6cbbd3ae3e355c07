//! Core pipeline types
//!
//! Items flow through three stages:
//! - **Ingest:** storage reference → encoded payload
//! - **Classify:** encoded payload → labeled scores
//! - **Filter:** labeled scores → accept/reject decision
//!
//! Each item's records are owned by the single orchestrator run processing it.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Stages and states
// ============================================================================

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Ingest,
    Classify,
    Filter,
}

impl Stage {
    /// Execution order
    pub const ORDER: [Stage; 3] = [Stage::Ingest, Stage::Classify, Stage::Filter];

    /// Orchestrator state while this stage runs
    pub fn state(&self) -> PipelineState {
        match self {
            Stage::Ingest => PipelineState::Ingesting,
            Stage::Classify => PipelineState::Classifying,
            Stage::Filter => PipelineState::Filtering,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Classify => "classify",
            Stage::Filter => "filter",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item orchestrator state
///
/// `Ingesting → Classifying → Filtering → Succeeded`, or `Failed` from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Ingesting,
    Classifying,
    Filtering,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed)
    }

    /// Whether `next` is a legal transition from `self`
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Ingesting, Classifying)
                | (Classifying, Filtering)
                | (Filtering, Succeeded)
                | (Ingesting, Failed)
                | (Classifying, Failed)
                | (Filtering, Failed)
        )
    }
}

// ============================================================================
// Image task
// ============================================================================

/// Object storage reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation {
    pub bucket: String,
    pub key: String,
}

impl StorageLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// One image moving through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTask {
    pub id: String,
    pub location: StorageLocation,
    /// Base64 payload; `None` until the ingest stage has run
    pub encoded_payload: Option<String>,
    /// Orchestrator state, advanced as the run moves through its stages
    pub status: PipelineState,
}

impl ImageTask {
    /// New task referencing a stored object, with a generated id
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), bucket, key)
    }

    pub fn with_id(id: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: StorageLocation::new(bucket, key),
            encoded_payload: None,
            status: PipelineState::Ingesting,
        }
    }

    /// Attach a caller-supplied payload; empty strings count as absent
    pub fn with_payload(mut self, encoded: impl Into<String>) -> Self {
        let encoded = encoded.into();
        self.encoded_payload = if encoded.is_empty() { None } else { Some(encoded) };
        self
    }

    pub fn is_encoded(&self) -> bool {
        self.encoded_payload.as_deref().is_some_and(|p| !p.is_empty())
    }
}

// ============================================================================
// Classification results
// ============================================================================

/// One label with its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledScore {
    pub label: String,
    pub score: f64,
}

/// Scores aligned positionally with the label vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledScores {
    pub entries: Vec<LabeledScore>,
}

impl LabeledScores {
    /// Highest score; ties go to the lowest vocabulary index
    pub fn top(&self) -> Option<&LabeledScore> {
        self.entries.iter().fold(None, |best: Option<&LabeledScore>, entry| match best {
            Some(b) if b.score >= entry.score => Some(b),
            _ => Some(entry),
        })
    }

    /// Raw scores in vocabulary order
    pub fn scores(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.score).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Confidence filter verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDecision {
    pub task_id: String,
    pub accepted: bool,
    pub top_label: String,
    pub top_score: f64,
    pub threshold: f64,
    pub reason: Option<String>,
}

// ============================================================================
// Outcomes
// ============================================================================

/// Attempts spent on one invoked stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAttempts {
    pub stage: Stage,
    pub attempts: u32,
}

/// Terminal status of one item's run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalStatus {
    Succeeded,
    Failed,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::Succeeded => "Succeeded",
            FinalStatus::Failed => "Failed",
        }
    }
}

/// Result of one orchestrator run, produced exactly once per item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub task_id: String,
    pub location: StorageLocation,
    /// Every invoked stage in order, including the one that failed
    pub stages_completed: Vec<StageAttempts>,
    pub final_status: FinalStatus,
    /// Stage whose error ended the run; `None` on success and cancellation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    pub error_kind: Option<ErrorKind>,
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<FilterDecision>,
    /// Raw endpoint output aligned to the vocabulary, once classified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inferences: Option<Vec<f64>>,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.final_status == FinalStatus::Succeeded
    }

    /// Attempts recorded for `stage`, if it was invoked
    pub fn attempts_for(&self, stage: Stage) -> Option<u32> {
        self.stages_completed
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.attempts)
    }

    pub fn invoked(&self, stage: Stage) -> bool {
        self.attempts_for(stage).is_some()
    }
}
