//! Ingest stage: storage reference → base64 payload

use crate::error::StageError;
use crate::storage::ObjectStore;
use crate::types::ImageTask;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;

/// Encode raw bytes as standard padded base64
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard padded base64; exact inverse of [`encode`]
pub fn decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}

/// Ingest stage
pub struct Codec {
    store: Arc<dyn ObjectStore>,
}

impl Codec {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Produce a task with its payload populated
    ///
    /// Tasks that already carry a payload are returned as-is without touching
    /// storage.
    pub async fn ingest(&self, task: &ImageTask) -> Result<ImageTask, StageError> {
        if task.is_encoded() {
            tracing::debug!(task_id = %task.id, "Payload supplied by caller, skipping fetch");
            return Ok(task.clone());
        }

        let bytes = self.store.get(&task.location).await?;

        tracing::debug!(
            task_id = %task.id,
            location = %task.location,
            bytes = bytes.len(),
            "Fetched and encoded object"
        );

        let mut encoded = task.clone();
        encoded.encoded_payload = Some(encode(&bytes));
        Ok(encoded)
    }
}
