//! # Edgelink Telemetry
//!
//! Structured logging setup and the worker memory-usage aggregator.
//!
//! Logs go through `tracing` with consistent fields (`worker`, `stream`,
//! `initiator`); binaries initialise the subscriber once at startup with
//! an env-filter and optional JSON output for log shippers.

mod aggregator;
mod config;
mod tracing_setup;

pub use aggregator::MemoryUsageAggregator;
pub use config::TelemetryConfig;
pub use tracing_setup::init_tracing;

use thiserror::Error;

/// Telemetry initialization errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The global subscriber was already installed.
    #[error("tracing subscriber already initialized")]
    AlreadyInitialized,

    /// The configured filter directive did not parse.
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
}
