//! # Inbound Ports
//!
//! Operations the event consumer and the startup sequence drive.

use async_trait::async_trait;
use shared_types::{RpcBlock, VirtualChainChange};

use crate::domain::{BlockOutcome, ChainReconciliation, ProcessingError, ResyncReport};

/// DAG processing API - inbound port.
///
/// Implementations serialize every operation against every other one.
#[async_trait]
pub trait ProcessingApi: Send + Sync {
    /// Bring the store up to the node's selected tip.
    ///
    /// Run at startup and after every reconnect. Wipes and re-anchors the
    /// store when the node's pruning point is not stored.
    async fn resync_database(&self) -> Result<ResyncReport, ProcessingError>;

    /// Ingest one block whose parents are expected to be stored already.
    ///
    /// Idempotent: a stored block is not inserted again, but its selected
    /// parent and merge sets are still reconciled.
    async fn process_block(&self, block: &RpcBlock) -> Result<BlockOutcome, ProcessingError>;

    /// Ingest a block together with every missing ancestor the node still
    /// has, ancestors first. Returns one outcome per processed block, the
    /// given block last.
    async fn process_block_and_dependencies(
        &self,
        block: RpcBlock,
    ) -> Result<Vec<BlockOutcome>, ProcessingError>;

    /// Apply a selected-chain delta: membership first, then merge-set colors,
    /// in one transaction.
    async fn process_virtual_change(
        &self,
        change: &VirtualChainChange,
    ) -> Result<ChainReconciliation, ProcessingError>;

    /// Fetch the chain delta from the highest stored chain block and apply it.
    async fn resync_virtual_selected_parent_chain(
        &self,
    ) -> Result<ChainReconciliation, ProcessingError>;
}
