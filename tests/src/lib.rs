//! # KGI Test Suite
//!
//! Cross-crate scenarios: the processing engine over real storage backends,
//! fed through the node event bus.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── dag_scenarios.rs   # dependency ordering, chain reconciliation
//!     ├── event_flow.rs      # shared-bus → handler → engine
//!     └── persistence.rs     # RocksDB-backed resync and restart
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p kgi-tests
//! cargo test -p kgi-tests integration::persistence::
//! ```

pub mod integration;
