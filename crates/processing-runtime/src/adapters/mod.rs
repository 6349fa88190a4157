//! # Adapters
//!
//! Production implementations of the store and node ports.

pub mod rocksdb_store;
pub mod wrpc;

pub use rocksdb_store::{RocksDbConfig, RocksDbStore};
pub use wrpc::{WrpcConfig, WrpcNodeClient};
