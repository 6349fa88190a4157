//! Selected-chain reconciliation.

use std::collections::HashMap;

use kgi_01_dag_storage::{BlockColor, BlockId, KeyValueStore, StorageError};
use shared_types::{BlockHash, VirtualChainChange};
use tracing::{info, warn};

use crate::domain::{ChainReconciliation, ErrorContext, NodeError, ProcessingError};
use crate::ports::NodeClient;

use super::engine::{EngineState, ResyncEngine};

impl<S: KeyValueStore, N: NodeClient> ResyncEngine<S, N> {
    pub(crate) async fn process_virtual_change_locked(
        &self,
        state: &EngineState,
        change: &VirtualChainChange,
    ) -> Result<ChainReconciliation, ProcessingError> {
        let mut report = ChainReconciliation::default();
        if change.is_empty() {
            return Ok(report);
        }

        let mut memberships: HashMap<BlockId, bool> = HashMap::new();
        let mut colors: HashMap<BlockId, BlockColor> = HashMap::new();

        for hash in &change.removed_chain_block_hashes {
            let Some(id) = self.resolve_or_ingest(state, hash, &mut report).await? else {
                continue;
            };
            memberships.insert(id, false);
            colors.insert(id, BlockColor::Gray);
            report.removed += 1;
        }

        for hash in &change.added_chain_block_hashes {
            let Some(id) = self.resolve_or_ingest(state, hash, &mut report).await? else {
                continue;
            };
            memberships.insert(id, true);
            report.added += 1;

            let block = match self.node.get_block(hash, false).await {
                Ok(block) => block,
                Err(NodeError::NotFound(_)) => {
                    warn!(
                        block_hash = %hash,
                        operation = "process_virtual_change",
                        "Chain block unknown to node, merge set not recolored"
                    );
                    continue;
                }
                Err(source) => {
                    return Err(ProcessingError::BlockNode {
                        operation: "get_block",
                        hash: *hash,
                        source,
                    })
                }
            };

            for blue in block.merge_set_blues() {
                if let Some(blue_id) = self.resolve_or_ingest(state, blue, &mut report).await? {
                    colors.insert(blue_id, BlockColor::Blue);
                }
            }
            for red in block.merge_set_reds() {
                if let Some(red_id) = self.resolve_or_ingest(state, red, &mut report).await? {
                    colors.insert(red_id, BlockColor::Red);
                }
            }
        }

        report.recolored = colors.len();
        self.store
            .run_in_transaction(|tx| {
                tx.update_block_is_in_virtual_selected_parent_chain(&memberships)
                    .during("update_block_is_in_virtual_selected_parent_chain")?;
                tx.update_block_colors(&colors)
                    .during("update_block_colors")
            })
            .await?;

        info!(
            removed = report.removed,
            added = report.added,
            recolored = report.recolored,
            backfilled = report.backfilled,
            "Virtual chain change applied"
        );
        Ok(report)
    }

    pub(crate) async fn resync_virtual_selected_parent_chain_locked(
        &self,
        state: &EngineState,
    ) -> Result<ChainReconciliation, ProcessingError> {
        let highest = self
            .store
            .run_in_transaction(|tx| {
                tx.highest_block_in_virtual_selected_parent_chain()
                    .during("highest_block_in_virtual_selected_parent_chain")
            })
            .await?;
        let anchor = state.anchor.map(|anchor| anchor.hash);

        let start = match (highest, anchor) {
            (Some(block), _) => block.block_hash,
            (None, Some(anchor)) => anchor,
            (None, None) => {
                warn!("No chain block stored and no anchor known, skipping chain resync");
                return Ok(ChainReconciliation::default());
            }
        };

        let change = match self
            .node
            .get_virtual_selected_parent_chain_from_block(&start)
            .await
        {
            Ok(change) => change,
            Err(source) => match anchor.filter(|anchor| source.is_not_found() && *anchor != start) {
                Some(anchor) => {
                    warn!(
                        block_hash = %start,
                        operation = "resync_virtual_selected_parent_chain",
                        "Highest chain block unknown to node, restarting from anchor"
                    );
                    self.node
                        .get_virtual_selected_parent_chain_from_block(&anchor)
                        .await
                        .for_block("get_virtual_selected_parent_chain_from_block", &anchor)?
                }
                None => {
                    return Err(ProcessingError::BlockNode {
                        operation: "get_virtual_selected_parent_chain_from_block",
                        hash: start,
                        source,
                    })
                }
            },
        };

        self.process_virtual_change_locked(state, &change).await
    }

    /// Stored id of `hash`, ingesting it with its dependencies when missing.
    ///
    /// `None` when neither the store nor the node has the block.
    async fn resolve_or_ingest(
        &self,
        state: &EngineState,
        hash: &BlockHash,
        report: &mut ChainReconciliation,
    ) -> Result<Option<BlockId>, ProcessingError> {
        if let Some(id) = self.lookup_block_id(hash).await? {
            return Ok(Some(id));
        }

        let block = match self.node.get_block(hash, false).await {
            Ok(block) => block,
            Err(NodeError::NotFound(_)) => {
                warn!(
                    block_hash = %hash,
                    operation = "process_virtual_change",
                    "Block referenced by chain change is unknown to node, skipping"
                );
                return Ok(None);
            }
            Err(source) => {
                return Err(ProcessingError::BlockNode {
                    operation: "get_block",
                    hash: *hash,
                    source,
                })
            }
        };

        let outcomes = self
            .process_block_and_dependencies_locked(state, block)
            .await?;
        report.backfilled += outcomes.iter().filter(|o| o.inserted).count();
        self.lookup_block_id(hash).await
    }

    async fn lookup_block_id(&self, hash: &BlockHash) -> Result<Option<BlockId>, ProcessingError> {
        self.store
            .run_in_transaction(|tx| match tx.block_id_by_hash(hash) {
                Ok(id) => Ok(Some(id)),
                Err(StorageError::BlockNotFound { .. }) => Ok(None),
                Err(source) => Err(ProcessingError::BlockStorage {
                    operation: "block_id_by_hash",
                    hash: *hash,
                    source,
                }),
            })
            .await
    }
}
