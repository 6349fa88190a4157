//! # DAG Storage (kgi-01)
//!
//! Persistence gateway for the mirrored block DAG.
//!
//! ## Tables
//!
//! The store is expressed over a plain [`KeyValueStore`]; each table is a key
//! prefix (see [`KeyPrefix`]):
//!
//! | Table | Key | Value |
//! |-------|-----|-------|
//! | blocks | `b/` id | [`Block`] |
//! | hash index | `h/` hash | id |
//! | edges | `e/` from ‖ to | [`Edge`] |
//! | height groups | `g/` height | size |
//! | chain members | `v/` height ‖ id | empty |
//! | reverse edges | `r/` to ‖ from | empty |
//! | height-group slots | `m/` height ‖ index | id |
//! | waiting children | `w/` parent hash ‖ child id | empty |
//! | sequences | `s/` name | next value |
//! | app config | `a/app_config` | [`AppConfig`] |
//!
//! ## Transactions
//!
//! All access goes through a [`DagTransaction`]. At most one transaction is
//! live per [`DagStore`]; the next caller waits on the store mutex. Writes are
//! buffered in the transaction and land in one atomic batch on
//! [`DagTransaction::commit`]. Dropping an uncommitted transaction discards
//! its writes and its identity-cache updates.
//!
//! ## Usage
//!
//! ```ignore
//! use kgi_01_dag_storage::{DagStore, InMemoryKVStore, StoreConfig};
//!
//! let store = DagStore::new(InMemoryKVStore::new(), StoreConfig::default());
//! let exists = store
//!     .run_in_transaction(|tx| tx.does_block_exist(&hash))
//!     .await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::memory::InMemoryKVStore;
pub use domain::cache::{CachedIdentity, IdentityCache};
pub use domain::entities::{AppConfig, Block, BlockColor, BlockId, Edge, HeightGroup, NewBlock};
pub use domain::errors::{KVStoreError, StorageError};
pub use domain::keys::KeyPrefix;
pub use ports::outbound::{reverse_seek_bound, BatchOperation, KeyValueStore};
pub use service::{DagStore, DagTransaction, StoreConfig};
