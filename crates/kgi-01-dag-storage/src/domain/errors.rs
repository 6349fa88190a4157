//! # Domain Errors
//!
//! Error types for the DAG store.
//!
//! A lookup miss on the identity cache is never an error; only a miss on both
//! the cache and the tables surfaces as [`StorageError::BlockNotFound`].

use shared_types::BlockHash;
use thiserror::Error;

use super::entities::BlockId;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// No block with this hash is stored.
    #[error("block {hash} not found in store")]
    BlockNotFound { hash: BlockHash },

    /// No block with this surrogate id is stored.
    #[error("block id {id} not found in store")]
    BlockIdNotFound { id: BlockId },

    /// A block with this hash is already stored.
    #[error("block {hash} already exists")]
    BlockExists { hash: BlockHash },

    /// The underlying key-value store failed.
    #[error("database error: {message}")]
    Database { message: String },

    /// A row could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Stored data violates the table layout.
    #[error("data corruption: {message}")]
    Corruption { message: String },
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Key-value store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KVStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    IOError { message: String },

    /// Data corruption in the store.
    #[error("KV store corruption: {message}")]
    CorruptionError { message: String },

    /// Key not found.
    #[error("Key not found in KV store")]
    NotFound,
}

impl From<KVStoreError> for StorageError {
    fn from(err: KVStoreError) -> Self {
        match err {
            KVStoreError::CorruptionError { message } => StorageError::Corruption { message },
            other => StorageError::Database {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_error_conversion() {
        let io: StorageError = KVStoreError::IOError {
            message: "disk".into(),
        }
        .into();
        assert!(matches!(io, StorageError::Database { .. }));

        let corrupt: StorageError = KVStoreError::CorruptionError {
            message: "bad".into(),
        }
        .into();
        assert_eq!(
            corrupt,
            StorageError::Corruption {
                message: "bad".into()
            }
        );
    }

    #[test]
    fn test_not_found_message_carries_hash() {
        let hash = BlockHash::from_bytes([0x11; 32]);
        let err = StorageError::BlockNotFound { hash };
        assert!(err.to_string().contains(&hash.to_hex()));
    }
}
