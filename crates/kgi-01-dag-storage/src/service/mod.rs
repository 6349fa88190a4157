//! # DAG Store Service
//!
//! Owns the key-value backend and the identity cache, and hands out
//! transactions one at a time.

mod transaction;


pub use transaction::DagTransaction;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::cache::{IdentityCache, DEFAULT_CACHE_CAPACITY};
use crate::domain::errors::StorageError;
use crate::ports::outbound::KeyValueStore;

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of hash → identity entries kept in memory.
    pub cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Persistence gateway for the mirrored DAG.
pub struct DagStore<S: KeyValueStore> {
    kv: Mutex<S>,
    cache: IdentityCache,
}

impl<S: KeyValueStore> DagStore<S> {
    /// Create a store with a fresh identity cache sized from `config`.
    pub fn new(kv: S, config: StoreConfig) -> Self {
        Self::with_cache(kv, IdentityCache::new(config.cache_capacity))
    }

    /// Create a store around an existing cache.
    pub fn with_cache(kv: S, cache: IdentityCache) -> Self {
        Self {
            kv: Mutex::new(kv),
            cache,
        }
    }

    /// Open a transaction, waiting for any live one to finish.
    pub async fn begin(&self) -> DagTransaction<'_, S> {
        DagTransaction::new(self.kv.lock().await, &self.cache)
    }

    /// Run `body` in a transaction: commit on `Ok`, roll back on `Err` or panic.
    pub async fn run_in_transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut DagTransaction<'_, S>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut tx = self.begin().await;
        let value = body(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Consume the store, returning the backend.
    pub fn into_inner(self) -> S {
        self.kv.into_inner()
    }
}
