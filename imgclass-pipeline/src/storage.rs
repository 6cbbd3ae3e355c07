//! Object storage adapters
//!
//! The ingest stage reads source images through [`ObjectStore`]. Adapters map
//! their native failures onto the stage taxonomy:
//! - missing object → `NotFoundError` (never retried)
//! - anything the next attempt might not hit → `TransientStorageError`

use crate::error::StageError;
use crate::types::StorageLocation;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Read access to stored source images
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the raw bytes of one object
    async fn get(&self, location: &StorageLocation) -> Result<Vec<u8>, StageError>;
}

// ============================================================================
// Filesystem store
// ============================================================================

/// Objects laid out as `<root>/<bucket>/<key>`
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a location to a path below the root
    ///
    /// Bucket and key must be relative and must not climb out of the root.
    fn resolve(&self, location: &StorageLocation) -> Option<PathBuf> {
        let relative = Path::new(&location.bucket).join(&location.key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || location.bucket.is_empty() || location.key.is_empty() {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, location: &StorageLocation) -> Result<Vec<u8>, StageError> {
        let path = self.resolve(location).ok_or_else(|| {
            StageError::not_found(format!("Invalid object reference: {}", location))
        })?;

        tracing::debug!(path = %path.display(), "Reading object from filesystem store");

        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                StageError::not_found(format!("Object not found: {}", location))
            }
            _ => StageError::transient_storage(format!("Read {} failed: {}", location, e)),
        })
    }
}

// ============================================================================
// HTTP store
// ============================================================================

/// Default timeout for object fetches
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Objects served at `GET {base_url}/{bucket}/{key}`
pub struct HttpObjectStore {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StageError> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| StageError::transient_storage(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, location: &StorageLocation) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            location.bucket,
            location.key.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, location: &StorageLocation) -> Result<Vec<u8>, StageError> {
        let url = self.object_url(location);
        tracing::debug!(url = %url, "Fetching object over HTTP");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| StageError::transient_storage(format!("Request failed: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StageError::not_found(format!("Object not found: {}", location)));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StageError::transient_storage(format!(
                "Storage returned {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StageError::transient_storage(format!("Body read failed: {}", e)))?;

        Ok(bytes.to_vec())
    }
}
