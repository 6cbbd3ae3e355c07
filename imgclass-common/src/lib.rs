//! # imgclass common library
//!
//! Shared code for the image classification pipeline crates:
//! - Error and result types
//! - Configuration file resolution and TOML loading
//! - Pipeline progress events and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
