//! # Node wRPC Adapter
//!
//! JSON-over-WebSocket implementation of [`NodeClient`].
//!
//! ## Framing
//!
//! ```text
//! request       {"id": 7, "method": "getBlock", "params": {...}}
//! response      {"id": 7, "params": {...}}  |  {"id": 7, "error": {"message": "..."}}
//! notification  {"method": "blockAddedNotification", "params": {...}}
//! ```
//!
//! [`NodeClient`]: kgi_02_dag_processing::NodeClient

pub mod client;
pub mod messages;

pub use client::{WrpcConfig, WrpcNodeClient};
