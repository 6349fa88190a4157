//! Ports layer: the processing API and the node it reads from.

pub mod inbound;
pub mod outbound;

pub use inbound::ProcessingApi;
pub use outbound::{MockNodeClient, NodeClient};
