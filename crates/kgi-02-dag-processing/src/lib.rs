//! # DAG Processing (kgi-02)
//!
//! Turns node notifications and node queries into DAG store writes.
//!
//! ## Flow
//!
//! ```text
//! NodeEvent ──▶ ResyncEngine ──▶ DependencyBatch ──▶ DagStore
//!                    │                  │
//!                    └──── NodeClient ◀─┘
//! ```
//!
//! - [`ResyncEngine::resync_database`](ProcessingApi::resync_database) brings
//!   the store up to the node's tip, starting over from the pruning point when
//!   the stored data predates it.
//! - [`ProcessingApi::process_block_and_dependencies`] ingests a block together
//!   with every missing ancestor the node still has, ancestors first.
//! - [`ProcessingApi::process_virtual_change`] applies a selected-chain delta
//!   and recolors merge sets.
//!
//! All three are serialized behind one engine lock, so a live notification
//! never interleaves with a resync in progress.
//!
//! ## Module Structure
//!
//! ```text
//! kgi-02-dag-processing/
//! ├── domain/          # Outcomes and errors
//! ├── algorithms/      # DependencyBatch
//! ├── ports/           # ProcessingApi (inbound), NodeClient (outbound)
//! ├── application/     # ResyncEngine
//! └── config.rs        # ProcessingConfig
//! ```

#![warn(clippy::all)]

pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use algorithms::DependencyBatch;
pub use application::ResyncEngine;
pub use config::ProcessingConfig;
pub use domain::{
    BlockOutcome, ChainReconciliation, ErrorContext, NodeError, ProcessingError, ResyncMode,
    ResyncReport,
};
pub use ports::{MockNodeClient, NodeClient, ProcessingApi};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
