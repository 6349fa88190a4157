//! Database resync: anchor check, start point, catch-up cycles.

use kgi_01_dag_storage::{BlockColor, HeightGroup, KeyValueStore, NewBlock, StorageError};
use shared_types::{BlockHash, RpcBlock};
use tracing::{info, warn};

use crate::domain::{ErrorContext, NodeError, ProcessingError, ResyncMode, ResyncReport};
use crate::ports::NodeClient;

use super::engine::{Anchor, EngineState, ResyncEngine};

impl<S: KeyValueStore, N: NodeClient> ResyncEngine<S, N> {
    pub(crate) async fn resync_database_locked(
        &self,
        state: &mut EngineState,
    ) -> Result<ResyncReport, ProcessingError> {
        let dag_info = self
            .node
            .get_block_dag_info()
            .await
            .during("get_block_dag_info")?;
        let anchor_hash = dag_info.pruning_point_hash;
        let anchor_block = self
            .node
            .get_block(&anchor_hash, false)
            .await
            .for_block("get_block", &anchor_hash)?;
        state.anchor = Some(Anchor {
            hash: anchor_hash,
            daa_score: anchor_block.daa_score(),
        });

        let force_clear = self.config.clear_db && !state.first_resync_done;
        state.first_resync_done = true;

        let stored_anchor_height = self
            .store
            .run_in_transaction(|tx| match tx.block_identity_by_hash(&anchor_hash) {
                Ok(identity) => Ok(Some(identity.height)),
                Err(StorageError::BlockNotFound { .. }) => Ok(None),
                Err(source) => Err(ProcessingError::BlockStorage {
                    operation: "block_identity_by_hash",
                    hash: anchor_hash,
                    source,
                }),
            })
            .await?;

        let (mode, start_hash) = match stored_anchor_height {
            Some(anchor_height) if !force_clear => {
                let loaded = self
                    .store
                    .run_in_transaction(|tx| tx.load_cache(anchor_height).during("load_cache"))
                    .await?;
                info!(
                    network = %dag_info.network,
                    anchor = %anchor_hash,
                    anchor_height,
                    cached = loaded,
                    "Anchor stored, resuming incremental sync"
                );
                let start = self.optimal_start_point(&anchor_hash, anchor_height).await?;
                (ResyncMode::Incremental, start)
            }
            _ => {
                if force_clear {
                    warn!(anchor = %anchor_hash, "Clearing database on request");
                } else {
                    warn!(anchor = %anchor_hash, "Anchor not stored, rebuilding database from anchor");
                }
                self.reset_to_anchor(&anchor_block).await?;
                (ResyncMode::Full, anchor_hash)
            }
        };

        self.run_resync_cycles(state, mode, start_hash).await
    }

    /// Wipe the DAG tables and store the anchor as the only block.
    async fn reset_to_anchor(&self, anchor: &RpcBlock) -> Result<(), ProcessingError> {
        let hash = anchor.hash;
        self.store
            .run_in_transaction(|tx| {
                tx.clear().during("clear")?;
                tx.insert_block(NewBlock {
                    block_hash: hash,
                    timestamp: anchor.header.timestamp,
                    parent_ids: Vec::new(),
                    height: 0,
                    height_group_index: 0,
                    color: BlockColor::Gray,
                    is_in_virtual_selected_parent_chain: true,
                    daa_score: anchor.daa_score(),
                })
                .for_block("insert_anchor", &hash)?;
                tx.insert_or_update_height_group(HeightGroup { height: 0, size: 1 })
                    .for_block("insert_or_update_height_group", &hash)
            })
            .await?;

        let present = self
            .store
            .run_in_transaction(|tx| tx.does_block_exist(&hash).for_block("does_block_exist", &hash))
            .await?;
        if !present {
            return Err(ProcessingError::AnchorMissing { hash });
        }
        Ok(())
    }

    /// A block `resync_start_offset` selected parents below the highest
    /// stored chain block, or the anchor when that block is unusable.
    async fn optimal_start_point(
        &self,
        anchor_hash: &BlockHash,
        anchor_height: u64,
    ) -> Result<BlockHash, ProcessingError> {
        let offset = self.config.resync_start_offset;
        let candidate = self
            .store
            .run_in_transaction(|tx| {
                let Some(mut current) = tx
                    .highest_block_in_virtual_selected_parent_chain()
                    .during("highest_block_in_virtual_selected_parent_chain")?
                else {
                    return Ok(None);
                };
                for _ in 0..offset {
                    let Some(parent_id) = current.selected_parent_id else {
                        break;
                    };
                    current = tx.block_by_id(parent_id).during("block_by_id")?;
                }
                Ok::<_, ProcessingError>(Some(current))
            })
            .await?;

        let Some(candidate) = candidate else {
            return Ok(*anchor_hash);
        };
        if candidate.height < anchor_height {
            return Ok(*anchor_hash);
        }

        match self.node.get_block(&candidate.block_hash, false).await {
            Ok(_) => {
                info!(
                    start = %candidate.block_hash,
                    height = candidate.height,
                    "Resync starting below highest chain block"
                );
                Ok(candidate.block_hash)
            }
            Err(NodeError::NotFound(_)) => {
                warn!(
                    block_hash = %candidate.block_hash,
                    operation = "optimal_start_point",
                    "Start block unknown to node, starting from anchor"
                );
                Ok(*anchor_hash)
            }
            Err(source) => Err(ProcessingError::BlockNode {
                operation: "get_block",
                hash: candidate.block_hash,
                source,
            }),
        }
    }

    /// Process everything from `start_hash` to the tip until two
    /// consecutive cycles find fewer than `convergence_threshold` new blocks.
    async fn run_resync_cycles(
        &self,
        state: &EngineState,
        mode: ResyncMode,
        start_hash: BlockHash,
    ) -> Result<ResyncReport, ProcessingError> {
        let threshold = self.config.convergence_threshold;
        let mut low_hash = start_hash;
        let mut cycles = 0u32;
        let mut blocks_processed = 0usize;
        let mut previous_gap: Option<usize> = None;
        let mut final_gap = 0usize;
        let mut converged = false;

        loop {
            cycles += 1;
            let hashes = self.collect_hashes_to_tip(&low_hash).await?;
            let latest = self
                .store
                .run_in_transaction(|tx| {
                    tx.find_latest_stored_block_index(&hashes)
                        .during("find_latest_stored_block_index")
                })
                .await?;
            let gap = hashes.len().saturating_sub(latest + 1);
            let start_index = if self.config.resync && cycles == 1 {
                0
            } else {
                latest.saturating_sub(self.config.rewind_margin)
            };
            let remaining = &hashes[start_index.min(hashes.len())..];

            info!(
                cycle = cycles,
                fetched = hashes.len(),
                gap,
                processing = remaining.len(),
                "Resync cycle"
            );

            let dependency_start = remaining.len().saturating_sub(self.config.dependency_window);
            for (position, hash) in remaining.iter().enumerate() {
                let block = match self.node.get_block(hash, false).await {
                    Ok(block) => block,
                    Err(NodeError::NotFound(_)) => {
                        warn!(
                            block_hash = %hash,
                            operation = "resync_database",
                            "Block pruned during resync, skipping"
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
                if position >= dependency_start {
                    blocks_processed += self
                        .process_block_and_dependencies_locked(state, block)
                        .await?
                        .len();
                } else {
                    self.process_block_locked(state, &block).await?;
                    blocks_processed += 1;
                }
            }

            self.resync_virtual_selected_parent_chain_locked(state).await?;
            final_gap = gap;

            if gap < threshold && previous_gap.is_some_and(|previous| previous < threshold) {
                converged = true;
                break;
            }
            if cycles >= self.config.max_resync_cycles {
                warn!(cycles, gap, "Resync cycle limit reached before convergence");
                break;
            }
            previous_gap = Some(gap);
            if let Some(last) = hashes.last() {
                low_hash = *last;
            }
        }

        info!(
            mode = ?mode,
            cycles,
            blocks_processed,
            final_gap,
            converged,
            "Resync finished"
        );
        Ok(ResyncReport {
            mode,
            cycles,
            blocks_processed,
            final_gap,
            converged,
        })
    }

    /// Page through `get_blocks` from `low_hash` until the selected tip is
    /// seen, the node runs out of blocks, or the per-cycle cap is reached.
    async fn collect_hashes_to_tip(
        &self,
        low_hash: &BlockHash,
    ) -> Result<Vec<BlockHash>, ProcessingError> {
        let tip = self
            .node
            .get_selected_tip_hash()
            .await
            .during("get_selected_tip_hash")?;

        let mut hashes: Vec<BlockHash> = Vec::new();
        let mut low = *low_hash;
        loop {
            let page = self
                .node
                .get_blocks(&low, false, false)
                .await
                .for_block("get_blocks", &low)?;
            let mut page_hashes = page.block_hashes;
            if !hashes.is_empty() && page_hashes.first() == Some(&low) {
                page_hashes.remove(0);
            }
            let Some(last) = page_hashes.last().copied() else {
                break;
            };
            let reached_tip = page_hashes.contains(&tip);
            hashes.extend(page_hashes);
            if reached_tip || hashes.len() >= self.config.max_hashes_per_cycle {
                break;
            }
            low = last;
        }
        Ok(hashes)
    }
}
