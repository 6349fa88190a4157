//! Per-block ingestion inside one transaction.
//!
//! A block stored while some parents are missing gets its height and edges
//! from the parents it has, plus a waiting marker per missing parent. When
//! such a parent is inserted later, the waiting child is linked to it and
//! raised (with its descendants) if it now sits at or below that parent.
//! Heights only ever grow; a block at height 0 is the anchor and never moves.

use std::collections::VecDeque;

use kgi_01_dag_storage::{
    Block, BlockColor, BlockId, CachedIdentity, DagTransaction, Edge, HeightGroup, KeyValueStore,
    NewBlock, StorageError,
};
use shared_types::{BlockHash, RpcBlock};
use tracing::{debug, info, warn};

use crate::domain::{BlockOutcome, ErrorContext, ProcessingError};

/// Insert `block` unless stored, then reconcile its selected parent and merge
/// sets when the node has validated it and all its parents are stored.
///
/// Only the block equal to `anchor` gets height 0.
pub(crate) fn ingest_block<S: KeyValueStore>(
    tx: &mut DagTransaction<'_, S>,
    block: &RpcBlock,
    anchor: Option<&BlockHash>,
) -> Result<BlockOutcome, ProcessingError> {
    let hash = block.hash;
    let is_anchor = anchor == Some(&hash);
    let exists = tx
        .does_block_exist(&hash)
        .for_block("does_block_exist", &hash)?;

    let (parents, missing) = resolve_parents(tx, block, !exists)?;
    let complete = missing.is_empty();

    let stored = if exists {
        let stored = tx.block_by_hash(&hash).for_block("block_by_hash", &hash)?;
        attach_parents(tx, stored, &parents)?
    } else {
        let stored = insert_new_block(tx, block, &parents, is_anchor)?;
        if !is_anchor {
            for parent in &missing {
                tx.add_waiting_child(parent, stored.id);
            }
        }
        adopt_waiting_children(tx, &stored)?;
        stored
    };

    let mut outcome = BlockOutcome {
        id: stored.id,
        height: stored.height,
        inserted: !exists,
        complete,
        metadata_reconciled: false,
    };

    if block.is_header_only() || !complete {
        debug!(
            block_hash = %hash,
            header_only = block.is_header_only(),
            missing_parents = missing.len(),
            "Deferring metadata reconciliation"
        );
        return Ok(outcome);
    }

    reconcile_metadata(tx, block, &stored)?;
    outcome.metadata_reconciled = true;
    Ok(outcome)
}

/// Stored identities of the block's direct parents, and the missing ones.
fn resolve_parents<S: KeyValueStore>(
    tx: &mut DagTransaction<'_, S>,
    block: &RpcBlock,
    log_missing: bool,
) -> Result<(Vec<CachedIdentity>, Vec<BlockHash>), ProcessingError> {
    let mut resolved = Vec::with_capacity(block.direct_parents().len());
    let mut missing = Vec::new();
    for parent in block.direct_parents() {
        match tx.block_identity_by_hash(parent) {
            Ok(identity) => resolved.push(identity),
            Err(StorageError::BlockNotFound { .. }) => {
                missing.push(*parent);
                if log_missing {
                    warn!(
                        block_hash = %block.hash,
                        parent_hash = %parent,
                        operation = "ingest_block",
                        "Parent not stored, block is incomplete"
                    );
                }
            }
            Err(source) => {
                return Err(ProcessingError::BlockStorage {
                    operation: "block_identity_by_hash",
                    hash: *parent,
                    source,
                })
            }
        }
    }
    Ok((resolved, missing))
}

fn insert_new_block<S: KeyValueStore>(
    tx: &mut DagTransaction<'_, S>,
    block: &RpcBlock,
    parents: &[CachedIdentity],
    is_anchor: bool,
) -> Result<Block, ProcessingError> {
    let hash = block.hash;
    let height = if is_anchor {
        0
    } else {
        parents.iter().map(|p| p.height).max().unwrap_or(0) + 1
    };
    let height_group_index = tx
        .height_group_size(height)
        .for_block("height_group_size", &hash)?;

    let stored = tx
        .insert_block(NewBlock {
            block_hash: hash,
            timestamp: block.header.timestamp,
            parent_ids: parents.iter().map(|p| p.id).collect(),
            height,
            height_group_index,
            color: BlockColor::Gray,
            is_in_virtual_selected_parent_chain: false,
            daa_score: block.daa_score(),
        })
        .for_block("insert_block", &hash)?;

    tx.insert_or_update_height_group(HeightGroup {
        height,
        size: height_group_index + 1,
    })
    .for_block("insert_or_update_height_group", &hash)?;

    for parent in parents {
        link_parent(tx, &stored, parent.id)?;
    }

    debug!(
        block_hash = %hash,
        block_id = stored.id,
        height,
        height_group_index,
        parents = parents.len(),
        "Block inserted"
    );
    Ok(stored)
}

/// Edge from `child` to a stored parent, with both endpoints' current layout.
fn link_parent<S: KeyValueStore>(
    tx: &mut DagTransaction<'_, S>,
    child: &Block,
    parent_id: BlockId,
) -> Result<(), ProcessingError> {
    let hash = child.block_hash;
    let parent = tx.block_by_id(parent_id).for_block("block_by_id", &hash)?;
    tx.insert_edge(&Edge {
        from_block_id: child.id,
        to_block_id: parent.id,
        from_height: child.height,
        to_height: parent.height,
        from_height_group_index: child.height_group_index,
        to_height_group_index: parent.height_group_index,
    })
    .for_block("insert_edge", &hash)
}

/// Link the children that were stored before `parent` to it.
fn adopt_waiting_children<S: KeyValueStore>(
    tx: &mut DagTransaction<'_, S>,
    parent: &Block,
) -> Result<(), ProcessingError> {
    let hash = parent.block_hash;
    let identity = CachedIdentity {
        id: parent.id,
        height: parent.height,
    };
    let children = tx
        .take_waiting_children(&hash)
        .for_block("take_waiting_children", &hash)?;
    for child_id in children {
        let child = tx.block_by_id(child_id).for_block("block_by_id", &hash)?;
        attach_parents(tx, child, std::slice::from_ref(&identity))?;
    }
    Ok(())
}

/// Add the parents in `parents` that `block` was stored without: extend its
/// parent list, raise it above them, and insert the edges.
fn attach_parents<S: KeyValueStore>(
    tx: &mut DagTransaction<'_, S>,
    block: Block,
    parents: &[CachedIdentity],
) -> Result<Block, ProcessingError> {
    let hash = block.block_hash;
    let added: Vec<CachedIdentity> = parents
        .iter()
        .filter(|parent| !block.parent_ids.contains(&parent.id))
        .copied()
        .collect();
    if added.is_empty() || block.height == 0 {
        return Ok(block);
    }

    let mut parent_ids = block.parent_ids.clone();
    parent_ids.extend(added.iter().map(|parent| parent.id));
    tx.update_block_parent_ids(block.id, parent_ids)
        .for_block("update_block_parent_ids", &hash)?;

    if let Some(required) = added.iter().map(|parent| parent.height + 1).max() {
        raise_height(tx, block.id, required)?;
    }
    let block = tx.block_by_id(block.id).for_block("block_by_id", &hash)?;
    for parent in &added {
        link_parent(tx, &block, parent.id)?;
    }

    info!(
        block_hash = %hash,
        block_id = block.id,
        attached = added.len(),
        height = block.height,
        "Late parents attached"
    );
    Ok(block)
}

/// Raise block `id` to at least `height`, then every descendant that ends
/// up at or below one of its parents.
fn raise_height<S: KeyValueStore>(
    tx: &mut DagTransaction<'_, S>,
    id: BlockId,
    height: u64,
) -> Result<(), ProcessingError> {
    let mut queue = VecDeque::from([(id, height)]);
    while let Some((id, height)) = queue.pop_front() {
        let current = tx.block_by_id(id).during("block_by_id")?;
        if current.height == 0 || current.height >= height {
            continue;
        }
        let hash = current.block_hash;
        tx.relocate_block(id, height)
            .for_block("relocate_block", &hash)?;
        for edge in tx.edges_to(id).for_block("edges_to", &hash)? {
            queue.push_back((edge.from_block_id, height + 1));
        }
    }
    Ok(())
}

fn reconcile_metadata<S: KeyValueStore>(
    tx: &mut DagTransaction<'_, S>,
    block: &RpcBlock,
    stored: &Block,
) -> Result<(), ProcessingError> {
    let hash = block.hash;

    if let Some(selected_parent) = block.selected_parent() {
        let resolved = resolve_best_effort(
            tx,
            &hash,
            std::slice::from_ref(&selected_parent),
            "resolve_selected_parent",
        )?;
        if let Some(&selected_parent_id) = resolved.first() {
            if stored.selected_parent_id != Some(selected_parent_id) {
                tx.update_block_selected_parent(stored.id, selected_parent_id)
                    .for_block("update_block_selected_parent", &hash)?;
            }
        }
    }

    let reds = resolve_best_effort(tx, &hash, block.merge_set_reds(), "resolve_merge_set_reds")?;
    let blues = resolve_best_effort(tx, &hash, block.merge_set_blues(), "resolve_merge_set_blues")?;
    if stored.merge_set_red_ids != reds || stored.merge_set_blue_ids != blues {
        tx.update_block_merge_set(stored.id, reds, blues)
            .for_block("update_block_merge_set", &hash)?;
    }
    Ok(())
}

/// Resolve what is stored; log and skip the rest.
fn resolve_best_effort<S: KeyValueStore>(
    tx: &mut DagTransaction<'_, S>,
    block_hash: &BlockHash,
    hashes: &[BlockHash],
    operation: &'static str,
) -> Result<Vec<BlockId>, ProcessingError> {
    let mut ids = Vec::with_capacity(hashes.len());
    for hash in hashes {
        match tx.block_id_by_hash(hash) {
            Ok(id) => ids.push(id),
            Err(StorageError::BlockNotFound { .. }) => {
                warn!(
                    block_hash = %block_hash,
                    parent_hash = %hash,
                    operation,
                    "Referenced block not stored, leaving unresolved"
                );
            }
            Err(source) => {
                return Err(ProcessingError::BlockStorage {
                    operation,
                    hash: *hash,
                    source,
                })
            }
        }
    }
    Ok(ids)
}
