//! Stage retry with exponential backoff
//!
//! Wraps one stage invocation with bounded retries.
//!
//! **Algorithm:**
//! 1. Attempt operation (bounded by the per-invocation timeout)
//! 2. If successful, return result
//! 3. If the error kind is retryable and attempts < max_attempts:
//!    log WARN, sleep `base_interval_ms × backoff_multiplier^(attempt-1)`
//!    (or a uniform sample of `[0, that]` with full jitter), retry
//! 4. Otherwise return the last error tagged with the attempts made
//!
//! An elapsed timeout is reported as `ErrorKind::Timeout`.

use crate::error::{ErrorKind, StageError};
use crate::types::Stage;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Randomization applied to the computed backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    #[default]
    None,
    /// Uniform in `[0, computed delay]`
    Full,
}

/// Retry specification for one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(rename = "retryable")]
    pub retryable_error_kinds: BTreeSet<ErrorKind>,
    pub max_attempts: u32,
    pub base_interval_ms: u64,
    pub backoff_multiplier: f64,
    #[serde(default)]
    pub jitter: Jitter,
}

impl RetryPolicy {
    /// Exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            retryable_error_kinds: BTreeSet::new(),
            max_attempts: 1,
            base_interval_ms: 0,
            backoff_multiplier: 1.0,
            jitter: Jitter::None,
        }
    }

    /// Default for the ingest stage: storage hiccups and timeouts
    pub fn ingest_default() -> Self {
        Self {
            retryable_error_kinds: [ErrorKind::TransientStorageError, ErrorKind::Timeout]
                .into_iter()
                .collect(),
            max_attempts: 3,
            base_interval_ms: 1000,
            backoff_multiplier: 2.0,
            jitter: Jitter::Full,
        }
    }

    /// Default for the classify stage: service errors, throttling, timeouts
    pub fn classify_default() -> Self {
        Self {
            retryable_error_kinds: [
                ErrorKind::TransientServiceError,
                ErrorKind::ThrottlingError,
                ErrorKind::Timeout,
            ]
            .into_iter()
            .collect(),
            max_attempts: 3,
            base_interval_ms: 1000,
            backoff_multiplier: 2.0,
            jitter: Jitter::Full,
        }
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_error_kinds.contains(&kind)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be a finite number >= 1, got {}",
                self.backoff_multiplier
            ));
        }
        Ok(())
    }

    /// Backoff after failed attempt number `attempt` (1-based), before jitter
    pub fn computed_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let ms = self.base_interval_ms as f64 * self.backoff_multiplier.powi(exponent);
        // `as` saturates for out-of-range floats
        Duration::from_millis(ms.round() as u64)
    }

    /// Backoff after failed attempt `attempt`, with jitter applied
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let computed = self.computed_delay(attempt);
        match self.jitter {
            Jitter::None => computed,
            Jitter::Full => {
                let ms = computed.as_millis().min(u64::MAX as u128) as u64;
                Duration::from_millis(rng.gen_range(0..=ms))
            }
        }
    }
}

/// Terminal stage error tagged with the attempts spent
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct StageFailure {
    pub error: StageError,
    pub attempts: u32,
}

impl StageFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }
}

/// Retry scheduled after a failed attempt
#[derive(Debug)]
pub struct RetryNotice<'a> {
    pub stage: Stage,
    /// 1-based number of the attempt that failed
    pub attempt: u32,
    pub error: &'a StageError,
    pub delay: Duration,
}

/// Everything the retry manager observed for one stage
#[derive(Debug)]
pub struct StageReport<T> {
    pub result: Result<T, StageFailure>,
    /// Attempts made, success or not
    pub attempts: u32,
    /// Sleeps taken between attempts, in order
    pub delays: Vec<Duration>,
}

/// Run `operation` under `policy`
///
/// `operation` receives the 1-based attempt number. `timeout` bounds each
/// invocation separately. `on_retry` is called before every backoff sleep.
pub async fn retry_stage<F, Fut, T, N>(
    stage: Stage,
    policy: &RetryPolicy,
    timeout: Option<Duration>,
    mut operation: F,
    mut on_retry: N,
) -> StageReport<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
    N: FnMut(&RetryNotice<'_>),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut delays = Vec::new();

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(stage = %stage, attempt, "Retrying stage");
        }

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, operation(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(StageError::timeout(format!(
                    "{} stage exceeded {} ms",
                    stage,
                    limit.as_millis()
                ))),
            },
            None => operation(attempt).await,
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(stage = %stage, attempt, "Stage succeeded after retry");
                }
                return StageReport {
                    result: Ok(value),
                    attempts: attempt,
                    delays,
                };
            }
            Err(err) => err,
        };

        if !policy.is_retryable(err.kind) {
            tracing::debug!(
                stage = %stage,
                attempt,
                error_kind = %err.kind,
                "Non-retryable stage error"
            );
            return StageReport {
                result: Err(StageFailure { error: err, attempts: attempt }),
                attempts: attempt,
                delays,
            };
        }

        if attempt >= max_attempts {
            tracing::error!(
                stage = %stage,
                attempt,
                max_attempts,
                error = %err,
                "Stage failed: retries exhausted"
            );
            return StageReport {
                result: Err(StageFailure { error: err, attempts: attempt }),
                attempts: attempt,
                delays,
            };
        }

        let delay = policy.delay_for(attempt, &mut rand::thread_rng());

        tracing::warn!(
            stage = %stage,
            attempt,
            error_kind = %err.kind,
            backoff_ms = delay.as_millis() as u64,
            remaining_attempts = max_attempts - attempt,
            "Stage failed with retryable error, will retry after backoff"
        );

        on_retry(&RetryNotice {
            stage,
            attempt,
            error: &err,
            delay,
        });

        tokio::time::sleep(delay).await;
        delays.push(delay);
    }
}
