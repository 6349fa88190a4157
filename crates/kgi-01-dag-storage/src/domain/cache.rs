//! # Identity Cache
//!
//! Bounded map from block hash to `(surrogate id, height)`.
//!
//! Eviction is least-recently-used. Only [`IdentityCache::get`] counts as a
//! use; [`IdentityCache::has`] and [`IdentityCache::peek`] leave recency
//! untouched, so existence checks (binary searches over hash sequences) do
//! not churn the working set.
//!
//! Readers share a read lock. Writers are serialized by the owning store, the
//! write lock here only guards the LRU bookkeeping.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::RwLock;
use shared_types::BlockHash;

use super::entities::BlockId;

/// Default capacity, comfortably above the number of blocks between the
/// pruning point and the tip.
pub const DEFAULT_CACHE_CAPACITY: usize = 500_000;

/// A cached identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedIdentity {
    pub id: BlockId,
    pub height: u64,
}

/// Bounded hash → identity cache.
pub struct IdentityCache {
    entries: RwLock<LruCache<BlockHash, CachedIdentity>>,
}

impl IdentityCache {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Whether the hash is cached. Does not affect recency.
    pub fn has(&self, hash: &BlockHash) -> bool {
        self.entries.read().contains(hash)
    }

    /// Look up without affecting recency.
    pub fn peek(&self, hash: &BlockHash) -> Option<CachedIdentity> {
        self.entries.read().peek(hash).copied()
    }

    /// Look up and mark the entry as most recently used.
    pub fn get(&self, hash: &BlockHash) -> Option<CachedIdentity> {
        self.entries.write().get(hash).copied()
    }

    /// Insert or overwrite, evicting the least recently used entry when full.
    pub fn set(&self, hash: BlockHash, id: BlockId, height: u64) {
        let evicted = self
            .entries
            .write()
            .push(hash, CachedIdentity { id, height });
        if let Some((evicted_hash, _)) = evicted {
            if evicted_hash != hash {
                tracing::trace!(block_hash = %evicted_hash, "Identity cache eviction");
            }
        }
    }

    /// Drop a single entry.
    pub fn remove(&self, hash: &BlockHash) -> Option<CachedIdentity> {
        self.entries.write().pop(hash)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.read().cap().get()
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
