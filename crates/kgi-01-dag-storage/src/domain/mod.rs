//! Domain layer: entities, keys, the identity cache and errors.

pub mod cache;
pub mod entities;
pub mod errors;
pub mod keys;
