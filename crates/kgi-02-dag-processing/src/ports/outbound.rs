//! # Outbound Ports
//!
//! The node the DAG is mirrored from.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{BlockDagInfo, BlockHash, BlocksPage, NodeInfo, RpcBlock, VirtualChainChange};

use crate::domain::NodeError;

/// Query side of a node connection - outbound port.
///
/// Notifications arrive separately, as node events on the event bus.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Pruning point, tips and network of the node's DAG.
    async fn get_block_dag_info(&self) -> Result<BlockDagInfo, NodeError>;

    /// One block with verbose data.
    ///
    /// Fails with [`NodeError::NotFound`] for a block outside the node's
    /// retention window.
    async fn get_block(
        &self,
        hash: &BlockHash,
        include_transactions: bool,
    ) -> Result<RpcBlock, NodeError>;

    /// Hashes (and optionally blocks) from `low_hash` towards the virtual, in
    /// DAG order. The page starts with `low_hash` itself and may stop short of
    /// the tip; callers page by passing the last hash back in.
    async fn get_blocks(
        &self,
        low_hash: &BlockHash,
        include_blocks: bool,
        include_transactions: bool,
    ) -> Result<BlocksPage, NodeError>;

    /// Tip of the virtual selected-parent chain.
    async fn get_selected_tip_hash(&self) -> Result<BlockHash, NodeError>;

    /// Chain delta from `start_hash` to the current selected tip.
    async fn get_virtual_selected_parent_chain_from_block(
        &self,
        start_hash: &BlockHash,
    ) -> Result<VirtualChainChange, NodeError>;

    async fn get_info(&self) -> Result<NodeInfo, NodeError>;
}

// =============================================================================
// Mock Implementation for Testing
// =============================================================================

#[derive(Debug, Clone)]
struct MockDag {
    blocks: HashMap<BlockHash, RpcBlock>,
    /// Insertion order, which callers keep topological.
    order: Vec<BlockHash>,
    /// Selected chain, oldest first.
    chain: Vec<BlockHash>,
    pruning_point: Option<BlockHash>,
    network: String,
    server_version: String,
    is_synced: bool,
    page_size: usize,
    should_fail: bool,
}

impl Default for MockDag {
    fn default() -> Self {
        Self {
            blocks: HashMap::new(),
            order: Vec::new(),
            chain: Vec::new(),
            pruning_point: None,
            network: "kaspa-simnet".to_string(),
            server_version: "0.12.0".to_string(),
            is_synced: true,
            page_size: 100,
            should_fail: false,
        }
    }
}

/// Mock node serving an in-memory DAG.
///
/// Blocks must be added parents first. The selected chain is set explicitly;
/// chain deltas are derived from it and from each block's selected parent.
#[derive(Debug, Default)]
pub struct MockNodeClient {
    dag: RwLock<MockDag>,
    get_block_calls: AtomicUsize,
}

impl MockNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a block.
    pub fn add_block(&self, block: RpcBlock) {
        let mut dag = self.dag.write();
        if !dag.blocks.contains_key(&block.hash) {
            dag.order.push(block.hash);
        }
        dag.blocks.insert(block.hash, block);
    }

    /// Forget a block, as if the node had pruned it.
    pub fn remove_block(&self, hash: &BlockHash) {
        let mut dag = self.dag.write();
        dag.blocks.remove(hash);
        dag.order.retain(|h| h != hash);
        dag.chain.retain(|h| h != hash);
    }

    pub fn set_pruning_point(&self, hash: BlockHash) {
        self.dag.write().pruning_point = Some(hash);
    }

    /// Replace the selected chain; the last hash becomes the selected tip.
    pub fn set_selected_chain(&self, chain: Vec<BlockHash>) {
        self.dag.write().chain = chain;
    }

    pub fn set_synced(&self, is_synced: bool) {
        self.dag.write().is_synced = is_synced;
    }

    pub fn set_server_version(&self, version: &str) {
        self.dag.write().server_version = version.to_string();
    }

    /// Maximum hashes per `get_blocks` page (minimum 1).
    pub fn set_page_size(&self, page_size: usize) {
        self.dag.write().page_size = page_size.max(1);
    }

    /// Make every request fail with a connection error.
    pub fn set_should_fail(&self, should_fail: bool) {
        self.dag.write().should_fail = should_fail;
    }

    /// Number of `get_block` requests served so far.
    pub fn get_block_calls(&self) -> usize {
        self.get_block_calls.load(Ordering::Relaxed)
    }

    pub fn block_count(&self) -> usize {
        self.dag.read().blocks.len()
    }

    fn check_failure(dag: &MockDag) -> Result<(), NodeError> {
        if dag.should_fail {
            return Err(NodeError::Connection("Mock failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    async fn get_block_dag_info(&self) -> Result<BlockDagInfo, NodeError> {
        let dag = self.dag.read();
        Self::check_failure(&dag)?;
        let pruning_point_hash = dag
            .pruning_point
            .ok_or_else(|| NodeError::Rpc("pruning point not set".to_string()))?;
        let virtual_daa_score = dag
            .blocks
            .values()
            .map(RpcBlock::daa_score)
            .max()
            .unwrap_or_default();
        Ok(BlockDagInfo {
            network: dag.network.clone(),
            pruning_point_hash,
            virtual_daa_score,
            tip_hashes: dag.chain.last().copied().into_iter().collect(),
        })
    }

    async fn get_block(
        &self,
        hash: &BlockHash,
        _include_transactions: bool,
    ) -> Result<RpcBlock, NodeError> {
        self.get_block_calls.fetch_add(1, Ordering::Relaxed);
        let dag = self.dag.read();
        Self::check_failure(&dag)?;
        dag.blocks.get(hash).cloned().ok_or(NodeError::NotFound(*hash))
    }

    async fn get_blocks(
        &self,
        low_hash: &BlockHash,
        include_blocks: bool,
        _include_transactions: bool,
    ) -> Result<BlocksPage, NodeError> {
        let dag = self.dag.read();
        Self::check_failure(&dag)?;
        let start = dag
            .order
            .iter()
            .position(|h| h == low_hash)
            .ok_or(NodeError::NotFound(*low_hash))?;
        let end = (start + dag.page_size).min(dag.order.len());
        let block_hashes = dag.order[start..end].to_vec();
        let blocks = if include_blocks {
            block_hashes
                .iter()
                .filter_map(|h| dag.blocks.get(h).cloned())
                .collect()
        } else {
            Vec::new()
        };
        Ok(BlocksPage {
            block_hashes,
            blocks,
        })
    }

    async fn get_selected_tip_hash(&self) -> Result<BlockHash, NodeError> {
        let dag = self.dag.read();
        Self::check_failure(&dag)?;
        dag.chain
            .last()
            .copied()
            .ok_or_else(|| NodeError::Rpc("selected chain is empty".to_string()))
    }

    async fn get_virtual_selected_parent_chain_from_block(
        &self,
        start_hash: &BlockHash,
    ) -> Result<VirtualChainChange, NodeError> {
        let dag = self.dag.read();
        Self::check_failure(&dag)?;

        // Walk selected parents back to the chain, collecting what fell off it.
        let mut removed_chain_block_hashes = Vec::new();
        let mut current = *start_hash;
        loop {
            if let Some(position) = dag.chain.iter().position(|h| *h == current) {
                return Ok(VirtualChainChange {
                    removed_chain_block_hashes,
                    added_chain_block_hashes: dag.chain[position + 1..].to_vec(),
                });
            }
            let block = dag.blocks.get(&current).ok_or(NodeError::NotFound(current))?;
            removed_chain_block_hashes.push(current);
            current = block
                .selected_parent()
                .ok_or(NodeError::NotFound(current))?;
        }
    }

    async fn get_info(&self) -> Result<NodeInfo, NodeError> {
        let dag = self.dag.read();
        Self::check_failure(&dag)?;
        Ok(NodeInfo {
            server_version: dag.server_version.clone(),
            is_synced: dag.is_synced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{hash, linear_node, make_block};

    #[tokio::test]
    async fn test_get_blocks_pages_from_low_hash() {
        let node = linear_node(6);
        node.set_page_size(3);

        let page = node.get_blocks(&hash(2), true, false).await.unwrap();
        assert_eq!(page.block_hashes, vec![hash(2), hash(3), hash(4)]);
        assert_eq!(page.blocks.len(), 3);

        let page = node.get_blocks(&hash(4), false, false).await.unwrap();
        assert_eq!(page.block_hashes, vec![hash(4), hash(5)]);
        assert!(page.blocks.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_block_is_not_found() {
        let node = linear_node(2);
        let err = node.get_block(&hash(9), false).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(node.get_block_calls(), 1);
    }

    #[tokio::test]
    async fn test_chain_delta_from_chain_member() {
        let node = linear_node(5);
        let change = node
            .get_virtual_selected_parent_chain_from_block(&hash(2))
            .await
            .unwrap();
        assert!(change.removed_chain_block_hashes.is_empty());
        assert_eq!(change.added_chain_block_hashes, vec![hash(3), hash(4)]);
    }

    #[tokio::test]
    async fn test_chain_delta_from_reorged_block() {
        let node = linear_node(3);
        // Side branch 10 off block 1 that lost the chain.
        node.add_block(make_block(10, &[1], 103));
        let change = node
            .get_virtual_selected_parent_chain_from_block(&hash(10))
            .await
            .unwrap();
        assert_eq!(change.removed_chain_block_hashes, vec![hash(10)]);
        assert_eq!(change.added_chain_block_hashes, vec![hash(2)]);
    }

    #[tokio::test]
    async fn test_should_fail() {
        let node = linear_node(2);
        node.set_should_fail(true);
        assert!(matches!(
            node.get_info().await,
            Err(NodeError::Connection(_))
        ));
        assert!(node.get_selected_tip_hash().await.is_err());
    }

    #[tokio::test]
    async fn test_dag_info_reports_pruning_point() {
        let node = linear_node(4);
        let info = node.get_block_dag_info().await.unwrap();
        assert_eq!(info.pruning_point_hash, hash(0));
        assert_eq!(info.virtual_daa_score, 103);
        assert_eq!(info.tip_hashes, vec![hash(3)]);
    }
}
