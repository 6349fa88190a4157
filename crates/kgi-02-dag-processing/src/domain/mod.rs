//! Domain layer: processing outcomes and errors.

pub mod entities;
pub mod errors;

pub use entities::{BlockOutcome, ChainReconciliation, ResyncMode, ResyncReport};
pub use errors::{ErrorContext, NodeError, ProcessingError};
