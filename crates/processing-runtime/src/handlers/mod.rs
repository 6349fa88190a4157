//! # Event Handlers
//!
//! Consumers of node events.

pub mod node_events;

pub use node_events::{HandlerError, NodeEventHandler};
