//! # Shared Types Crate
//!
//! Types exchanged between the node-facing adapters, the processing engine and
//! the DAG store.
//!
//! ## Contents
//!
//! - [`BlockHash`]: 32-byte block identity assigned by the node
//! - [`RpcBlock`]: a block as reported by the node (header + GHOSTDAG verbose data)
//! - [`BlockDagInfo`], [`NodeInfo`]: node status queries
//! - [`VirtualChainChange`]: a selected-parent-chain delta

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
