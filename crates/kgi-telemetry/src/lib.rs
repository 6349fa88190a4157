//! # KGI Telemetry
//!
//! Logging for the DAG indexer.
//!
//! ## Outputs
//!
//! - Console: human-readable or JSON, filtered by the configured level
//! - `<log_dir>/kgi-processing.<date>.log`: every event at the configured
//!   level, rotated daily
//! - `<log_dir>/kgi-processing_err.<date>.log`: warnings and errors only
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kgi_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! // The guard flushes file writers when dropped; hold it until exit.
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `KGI_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `KGI_JSON_LOGS` | `false` | JSON console output |
//! | `KGI_LOG_DIR` | unset | Directory for log files |
//! | `KGI_CONSOLE_OUTPUT` | `true` | Enable console output |

mod config;
mod logging;
mod subscriber;

pub use config::TelemetryConfig;
pub use subscriber::{init_telemetry, TelemetryGuard};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {message}")]
    Filter { filter: String, message: String },

    #[error("Failed to create log directory {path}: {message}")]
    LogDir { path: String, message: String },

    #[error("Failed to install global subscriber: {0}")]
    Install(String),
}
