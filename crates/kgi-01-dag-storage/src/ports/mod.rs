//! Port definitions.
//!
//! Only outbound ports: the store is driven directly by the processing crate.

pub mod outbound;
