//! Error taxonomy for pipeline stages
//!
//! Every stage failure carries an [`ErrorKind`]. The kind alone decides
//! whether the retry manager may try again; the message is for humans.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Classification of a stage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Object storage unavailable or interrupted (retryable)
    TransientStorageError,
    /// Inference endpoint or client/transport failure (retryable)
    TransientServiceError,
    /// Inference endpoint rate limit (retryable)
    ThrottlingError,
    /// Per-invocation timeout elapsed (retryable)
    Timeout,
    /// Source object does not exist (permanent)
    NotFoundError,
    /// Endpoint output or payload violates the contract (permanent)
    MalformedResponseError,
    /// Top score under the configured threshold (terminal, never retried)
    ConfidenceBelowThreshold,
    /// Cancellation observed at a stage boundary (terminal)
    Cancelled,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::TransientStorageError,
        ErrorKind::TransientServiceError,
        ErrorKind::ThrottlingError,
        ErrorKind::Timeout,
        ErrorKind::NotFoundError,
        ErrorKind::MalformedResponseError,
        ErrorKind::ConfidenceBelowThreshold,
        ErrorKind::Cancelled,
    ];

    /// Wire identifier (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientStorageError => "TRANSIENT_STORAGE_ERROR",
            ErrorKind::TransientServiceError => "TRANSIENT_SERVICE_ERROR",
            ErrorKind::ThrottlingError => "THROTTLING_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NotFoundError => "NOT_FOUND_ERROR",
            ErrorKind::MalformedResponseError => "MALFORMED_RESPONSE_ERROR",
            ErrorKind::ConfidenceBelowThreshold => "CONFIDENCE_BELOW_THRESHOLD",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    /// Whether default retry policies treat this kind as retryable
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientStorageError
                | ErrorKind::TransientServiceError
                | ErrorKind::ThrottlingError
                | ErrorKind::Timeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown error kind: {}", s))
    }
}

/// Failure of a single stage invocation
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient_storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientStorageError, message)
    }

    pub fn transient_service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientServiceError, message)
    }

    pub fn throttling(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ThrottlingError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFoundError, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponseError, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }
}
