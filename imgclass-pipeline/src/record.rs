//! Versioned stage record
//!
//! The record handed between stages and accepted as batch input:
//!
//! | field | set by | notes |
//! |---|---|---|
//! | `schema_version` | writer | currently `1`; missing means `1` |
//! | `image_data` | caller or ingest stage | base64, may be empty on input |
//! | `s3_bucket` / `s3_key` | caller | `storage_bucket` / `storage_key` accepted as aliases |
//! | `inferences` | classify stage | aligned to the label vocabulary |
//!
//! The filter stage never rewrites the record; a rejection ends the run.

use crate::types::{ExecutionOutcome, ImageTask};
use serde::{Deserialize, Serialize};

/// Current record schema version
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Optional caller-chosen id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub image_data: String,
    #[serde(alias = "storage_bucket")]
    pub s3_bucket: String,
    #[serde(alias = "storage_key")]
    pub s3_key: String,
    #[serde(default)]
    pub inferences: Vec<f64>,
}

impl StageRecord {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            id: None,
            image_data: String::new(),
            s3_bucket: bucket.into(),
            s3_key: key.into(),
            inferences: Vec::new(),
        }
    }

    /// Final record of an accepted run; `None` for failed runs
    ///
    /// The payload is not retained past the run, so `image_data` is empty.
    pub fn from_outcome(outcome: &ExecutionOutcome) -> Option<Self> {
        if !outcome.is_success() {
            return None;
        }

        Some(Self {
            schema_version: SCHEMA_VERSION,
            id: Some(outcome.task_id.clone()),
            image_data: String::new(),
            s3_bucket: outcome.location.bucket.clone(),
            s3_key: outcome.location.key.clone(),
            inferences: outcome.inferences.clone().unwrap_or_default(),
        })
    }

    /// Convert to a pipeline task, rejecting unknown schema versions
    pub fn into_task(self) -> Result<ImageTask, String> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(format!(
                "Unsupported record schema version {} (expected {})",
                self.schema_version, SCHEMA_VERSION
            ));
        }
        let has_reference = !self.s3_bucket.trim().is_empty() && !self.s3_key.trim().is_empty();
        if !has_reference && self.image_data.is_empty() {
            return Err("Record has neither a storage reference nor image_data".to_string());
        }

        let task = match self.id {
            Some(id) => ImageTask::with_id(id, self.s3_bucket, self.s3_key),
            None => ImageTask::new(self.s3_bucket, self.s3_key),
        };
        Ok(task.with_payload(self.image_data))
    }
}

/// Parse batch input: a JSON array of records, or one record per line
pub fn parse_records(input: &str) -> Result<Vec<StageRecord>, serde_json::Error> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed);
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(serde_json::from_str)
        .collect()
}
