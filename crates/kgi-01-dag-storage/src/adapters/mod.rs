//! Adapters for the outbound ports.

pub mod memory;
