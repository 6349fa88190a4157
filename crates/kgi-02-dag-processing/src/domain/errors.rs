//! # Processing Errors
//!
//! Expected misses (a parent the node already pruned, a merge-set member not
//! stored yet) are logged where they happen and never surface here.

use kgi_01_dag_storage::StorageError;
use shared_types::BlockHash;
use thiserror::Error;

/// Failure reported by a [`NodeClient`](crate::ports::NodeClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// Transport failure; the request may not have reached the node.
    #[error("node connection error: {0}")]
    Connection(String),

    /// The node does not know the block, usually because it was pruned.
    #[error("block {0} not found by node")]
    NotFound(BlockHash),

    /// The node answered with an error.
    #[error("node RPC error: {0}")]
    Rpc(String),

    /// The answer could not be decoded.
    #[error("malformed node response: {0}")]
    MalformedResponse(String),
}

impl NodeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, NodeError::NotFound(_))
    }
}

/// Errors that abort a processing operation.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("storage failure during {operation} for block {hash}: {source}")]
    BlockStorage {
        operation: &'static str,
        hash: BlockHash,
        #[source]
        source: StorageError,
    },

    #[error("storage failure during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("node request {operation} failed for block {hash}: {source}")]
    BlockNode {
        operation: &'static str,
        hash: BlockHash,
        #[source]
        source: NodeError,
    },

    #[error("node request {operation} failed: {source}")]
    Node {
        operation: &'static str,
        #[source]
        source: NodeError,
    },

    /// A dependency walk discovered more missing ancestors than one batch holds.
    #[error("dependency batch capacity of {capacity} blocks exceeded")]
    BatchCapacityExceeded { capacity: usize },

    /// The anchor was written but cannot be read back.
    #[error("anchor block {hash} missing from store after reset")]
    AnchorMissing { hash: BlockHash },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<StorageError> for ProcessingError {
    fn from(source: StorageError) -> Self {
        ProcessingError::Storage {
            operation: "transaction",
            source,
        }
    }
}

/// Attach the failing operation to storage and node results.
pub trait ErrorContext<T> {
    /// Failure while handling one block.
    fn for_block(self, operation: &'static str, hash: &BlockHash) -> Result<T, ProcessingError>;

    /// Failure not tied to a single block.
    fn during(self, operation: &'static str) -> Result<T, ProcessingError>;
}

impl<T> ErrorContext<T> for Result<T, StorageError> {
    fn for_block(self, operation: &'static str, hash: &BlockHash) -> Result<T, ProcessingError> {
        self.map_err(|source| ProcessingError::BlockStorage {
            operation,
            hash: *hash,
            source,
        })
    }

    fn during(self, operation: &'static str) -> Result<T, ProcessingError> {
        self.map_err(|source| ProcessingError::Storage { operation, source })
    }
}

impl<T> ErrorContext<T> for Result<T, NodeError> {
    fn for_block(self, operation: &'static str, hash: &BlockHash) -> Result<T, ProcessingError> {
        self.map_err(|source| ProcessingError::BlockNode {
            operation,
            hash: *hash,
            source,
        })
    }

    fn during(self, operation: &'static str) -> Result<T, ProcessingError> {
        self.map_err(|source| ProcessingError::Node { operation, source })
    }
}
