//! Application layer: the resync engine.

mod chain;
mod engine;
mod ingest;
mod resync;


pub use engine::ResyncEngine;
