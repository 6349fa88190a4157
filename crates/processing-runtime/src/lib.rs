//! # Processing Runtime
//!
//! Wires the DAG store and processing engine to a live node.
//!
//! ```text
//! node ──wRPC──► WrpcNodeClient ──NodeEvent──► NodeEventHandler ──► ResyncEngine ──► DagStore<RocksDbStore>
//!                      ▲                                                  │
//!                      └──────────────── queries (get_block, ...) ────────┘
//! ```
//!
//! The `kgi-processing` binary parses [`config::Args`], opens RocksDB,
//! connects to the node and hands everything to [`ProcessingRuntime`].

#![warn(clippy::all)]

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod runtime;

pub use config::{Args, ConfigError, Network, RuntimeConfig};
pub use runtime::{ProcessingRuntime, RuntimeError, RuntimeOptions, ShutdownHandle};

/// Processing crate version, recorded in `app_config`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
