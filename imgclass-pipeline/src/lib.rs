//! imgclass pipeline library
//!
//! Stored image → base64 payload → remote classification → confidence
//! filter, with per-stage retries, terminal-failure notifications and
//! bounded-concurrency batches.

pub mod classifier;
pub mod codec;
pub mod config;
pub mod error;
pub mod fanout;
pub mod filter;
pub mod notify;
pub mod orchestrator;
pub mod record;
pub mod retry;
pub mod storage;
pub mod types;

pub use crate::config::PipelineConfig;
pub use crate::error::{ErrorKind, StageError};
pub use crate::fanout::{BatchReport, BatchStatus, FanOutCoordinator};
pub use crate::orchestrator::Orchestrator;
pub use crate::types::{ExecutionOutcome, ImageTask};
