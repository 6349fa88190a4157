//! Algorithms module for DAG processing
//!
//! Contains:
//! - Dependency batch (missing-ancestor discovery and ordering)

pub mod dependency_batch;

pub use dependency_batch::DependencyBatch;
