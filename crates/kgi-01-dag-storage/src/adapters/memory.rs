//! In-memory key-value store, used by tests and the integration scenarios.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::domain::errors::KVStoreError;
use crate::ports::outbound::{reverse_seek_bound, BatchOperation, KeyValueStore};

/// Ordered in-memory key-value store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKVStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryKVStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys across all tables.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl KeyValueStore for InMemoryKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.data.remove(key);
        Ok(())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        // Nothing can fail midway in memory.
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    self.data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.data.contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        let results = self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(results)
    }

    fn last_with_prefix(
        &self,
        prefix: &[u8],
        before: Option<&[u8]>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        let upper = match reverse_seek_bound(prefix, before) {
            Some(bound) if bound.as_slice() <= prefix => return Ok(None),
            Some(bound) => Bound::Excluded(bound),
            None => Bound::Unbounded,
        };
        Ok(self
            .data
            .range((Bound::Included(prefix.to_vec()), upper))
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone())))
    }
}
