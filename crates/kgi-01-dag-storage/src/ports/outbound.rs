//! # Outbound Ports (Driven Ports)
//!
//! Dependencies of the DAG store, implemented by adapters.

use crate::domain::errors::KVStoreError;

/// Abstract interface for key-value storage.
///
/// Production: RocksDB. Testing: [`crate::InMemoryKVStore`].
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Delete a key.
    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError>;

    /// Execute an atomic batch write.
    ///
    /// Either ALL operations in the batch succeed, or NONE are applied.
    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError>;

    /// All pairs whose key starts with `prefix`, in ascending key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError>;

    /// The pair with the greatest key that starts with `prefix`, restricted
    /// to keys strictly below `before` when given.
    ///
    /// Seeks from the end instead of scanning the prefix.
    fn last_with_prefix(
        &self,
        prefix: &[u8],
        before: Option<&[u8]>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, KVStoreError>;
}

/// Smallest key greater than every key starting with `prefix`.
///
/// `None` when no such key exists (empty or all-`0xFF` prefix).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.pop() {
        if last < u8::MAX {
            bound.push(last + 1);
            return Some(bound);
        }
    }
    None
}

/// Exclusive upper bound of a reverse seek: the tighter of `before` and the
/// end of the prefix range.
pub fn reverse_seek_bound(prefix: &[u8], before: Option<&[u8]>) -> Option<Vec<u8>> {
    match (prefix_upper_bound(prefix), before) {
        (Some(end), Some(before)) => Some(end.min(before.to_vec())),
        (None, Some(before)) => Some(before.to_vec()),
        (end, None) => end,
    }
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }

    /// Key touched by this operation.
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOperation::Put { key, .. } | BatchOperation::Delete { key } => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound(b"v/"), Some(b"v0".to_vec()));
        assert_eq!(prefix_upper_bound(&[1, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_upper_bound(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_upper_bound(b""), None);
    }

    #[test]
    fn test_reverse_seek_bound_takes_the_tighter_limit() {
        assert_eq!(reverse_seek_bound(b"v/", None), Some(b"v0".to_vec()));
        assert_eq!(reverse_seek_bound(b"v/", Some(b"v/5")), Some(b"v/5".to_vec()));
        assert_eq!(reverse_seek_bound(b"v/", Some(b"w")), Some(b"v0".to_vec()));
        assert_eq!(reverse_seek_bound(&[0xFF], Some(&[0xFF, 3])), Some(vec![0xFF, 3]));
    }
}
