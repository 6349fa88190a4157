//! # Dependency Batch
//!
//! Collects a block and every ancestor that is neither stored nor pruned, then
//! hands them out ancestors first.
//!
//! Discovery is an index-scanned queue that only grows: each queued block's
//! parents are checked, and missing ones fetched from the node are appended
//! and scanned in turn. No recursion, so depth is bounded by the batch
//! capacity rather than the stack.
//!
//! Ordering is Kahn's algorithm over the in-batch parent links. Among blocks
//! that are ready at the same time the latest discovered goes first.

use std::collections::{BinaryHeap, HashMap};

use kgi_01_dag_storage::{DagTransaction, KeyValueStore};
use shared_types::{BlockHash, RpcBlock};
use tracing::{debug, warn};

use crate::domain::{ErrorContext, NodeError, ProcessingError};
use crate::ports::NodeClient;

struct BatchSlot {
    hash: BlockHash,
    /// `None` once popped.
    block: Option<RpcBlock>,
}

/// Work-list of blocks to ingest in dependency order.
pub struct DependencyBatch {
    slots: Vec<BatchSlot>,
    index: HashMap<BlockHash, usize>,
    /// Lower bound on DAA score; blocks below it are out of scope.
    anchor_daa_score: Option<u64>,
    capacity: usize,
    /// Slot indices in pop order, reversed. Rebuilt after every `add`.
    ready: Vec<usize>,
    dirty: bool,
}

impl DependencyBatch {
    /// Empty batch. `anchor_daa_score` of `None` puts every block in scope.
    pub fn new(anchor_daa_score: Option<u64>, capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            anchor_daa_score,
            capacity: capacity.max(1),
            ready: Vec::new(),
            dirty: false,
        }
    }

    /// Whether the block is at or above the anchor.
    pub fn in_scope(&self, block: &RpcBlock) -> bool {
        self.anchor_daa_score
            .map_or(true, |anchor| block.daa_score() >= anchor)
    }

    /// Queue a block. Returns `false` for a duplicate or out-of-scope block.
    pub fn add(&mut self, block: RpcBlock) -> Result<bool, ProcessingError> {
        if self.index.contains_key(&block.hash) || !self.in_scope(&block) {
            return Ok(false);
        }
        if self.slots.len() >= self.capacity {
            return Err(ProcessingError::BatchCapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.index.insert(block.hash, self.slots.len());
        self.slots.push(BatchSlot {
            hash: block.hash,
            block: Some(block),
        });
        self.dirty = true;
        Ok(true)
    }

    /// Whether the block is queued and not yet popped.
    pub fn has(&self, hash: &BlockHash) -> bool {
        self.index.contains_key(hash)
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&RpcBlock> {
        let slot = *self.index.get(hash)?;
        self.slots[slot].block.as_ref()
    }

    /// Blocks still queued.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Seed the batch with `block` and pull in its missing ancestors.
    ///
    /// A parent counts as missing when it is neither queued nor stored. A
    /// parent the node no longer has is logged and skipped; any other node
    /// failure aborts the collection.
    pub async fn collect_block_and_dependencies<S, N>(
        &mut self,
        tx: &DagTransaction<'_, S>,
        node: &N,
        block: RpcBlock,
    ) -> Result<(), ProcessingError>
    where
        S: KeyValueStore,
        N: NodeClient + ?Sized,
    {
        let seed = block.hash;
        if !self.add(block)? {
            debug!(block_hash = %seed, "Seed block already queued or out of scope");
        }

        let mut cursor = 0;
        while cursor < self.slots.len() {
            let Some(queued) = self.slots[cursor].block.as_ref() else {
                cursor += 1;
                continue;
            };
            let child = queued.hash;
            let parents = queued.direct_parents().to_vec();
            for parent in parents {
                if self.has(&parent)
                    || tx
                        .contains_block(&parent)
                        .for_block("contains_block", &parent)?
                {
                    continue;
                }
                match node.get_block(&parent, false).await {
                    Ok(parent_block) => {
                        if self.add(parent_block)? {
                            debug!(block_hash = %child, parent_hash = %parent, "Queued missing parent");
                        } else {
                            debug!(block_hash = %child, parent_hash = %parent, "Missing parent is below the anchor");
                        }
                    }
                    Err(NodeError::NotFound(_)) => {
                        warn!(
                            block_hash = %child,
                            parent_hash = %parent,
                            operation = "collect_block_and_dependencies",
                            "Parent unknown to node, skipping"
                        );
                    }
                    Err(source) => {
                        return Err(ProcessingError::BlockNode {
                            operation: "get_block",
                            hash: parent,
                            source,
                        })
                    }
                }
            }
            cursor += 1;
        }

        debug!(block_hash = %seed, batch_size = self.len(), "Dependencies collected");
        Ok(())
    }

    /// Queue only the missing direct parents of `block`, without walking further.
    pub async fn collect_direct_dependencies<S, N>(
        &mut self,
        tx: &DagTransaction<'_, S>,
        node: &N,
        block: &RpcBlock,
    ) -> Result<(), ProcessingError>
    where
        S: KeyValueStore,
        N: NodeClient + ?Sized,
    {
        for parent in block.direct_parents() {
            if self.has(parent) || tx.contains_block(parent).for_block("contains_block", parent)?
            {
                continue;
            }
            match node.get_block(parent, false).await {
                Ok(parent_block) => {
                    self.add(parent_block)?;
                }
                Err(NodeError::NotFound(_)) => {
                    warn!(
                        block_hash = %block.hash,
                        parent_hash = %parent,
                        operation = "collect_direct_dependencies",
                        "Parent unknown to node, skipping"
                    );
                }
                Err(source) => {
                    return Err(ProcessingError::BlockNode {
                        operation: "get_block",
                        hash: *parent,
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    /// Next block whose queued parents have all been popped.
    pub fn pop(&mut self) -> Option<RpcBlock> {
        if self.dirty {
            self.rebuild_order();
        }
        while let Some(slot) = self.ready.pop() {
            if let Some(block) = self.slots[slot].block.take() {
                self.index.remove(&self.slots[slot].hash);
                return Some(block);
            }
        }
        None
    }

    /// Kahn's algorithm over the blocks still queued.
    fn rebuild_order(&mut self) {
        self.dirty = false;

        let mut in_degree: HashMap<usize, usize> = HashMap::new();
        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        for (slot, entry) in self.slots.iter().enumerate() {
            let Some(block) = entry.block.as_ref() else {
                continue;
            };
            let mut degree = 0;
            for parent in block.direct_parents() {
                if let Some(&parent_slot) = self.index.get(parent) {
                    if parent_slot != slot {
                        degree += 1;
                        children.entry(parent_slot).or_default().push(slot);
                    }
                }
            }
            in_degree.insert(slot, degree);
        }

        // Max-heap on slot index: latest discovered first.
        let mut queue: BinaryHeap<usize> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(slot, _)| *slot)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(slot) = queue.pop() {
            order.push(slot);
            let Some(next) = children.get(&slot) else {
                continue;
            };
            for child in next {
                let Some(degree) = in_degree.get_mut(child) else {
                    continue;
                };
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push(*child);
                }
            }
        }

        if order.len() < in_degree.len() {
            let mut stuck: Vec<usize> = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(slot, _)| *slot)
                .collect();
            warn!(blocks = stuck.len(), "Parent cycle in dependency batch, appending in discovery order");
            stuck.sort_unstable_by(|a, b| b.cmp(a));
            order.extend(stuck);
        }

        order.reverse();
        self.ready = order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MockNodeClient;
    use crate::test_utils::{hash, make_block};
    use kgi_01_dag_storage::{DagStore, InMemoryKVStore, NewBlock, StoreConfig};

    fn new_store() -> DagStore<InMemoryKVStore> {
        DagStore::new(InMemoryKVStore::new(), StoreConfig { cache_capacity: 64 })
    }

    async fn store_block(store: &DagStore<InMemoryKVStore>, n: u8) {
        let mut tx = store.begin().await;
        tx.insert_block(NewBlock {
            block_hash: hash(n),
            timestamp: 0,
            parent_ids: vec![],
            height: 0,
            height_group_index: 0,
            color: Default::default(),
            is_in_virtual_selected_parent_chain: false,
            daa_score: 0,
        })
        .unwrap();
        tx.commit().unwrap();
    }

    fn drain(batch: &mut DependencyBatch) -> Vec<BlockHash> {
        std::iter::from_fn(|| batch.pop()).map(|b| b.hash).collect()
    }

    fn position(order: &[BlockHash], n: u8) -> usize {
        order.iter().position(|h| *h == hash(n)).unwrap()
    }

    #[test]
    fn test_add_deduplicates_and_scopes() {
        let mut batch = DependencyBatch::new(Some(100), 10);
        assert!(batch.add(make_block(1, &[], 150)).unwrap());
        assert!(!batch.add(make_block(1, &[], 150)).unwrap());
        assert!(!batch.add(make_block(2, &[], 99)).unwrap());
        assert!(batch.has(&hash(1)));
        assert!(!batch.has(&hash(2)));
        assert_eq!(batch.get(&hash(1)).map(|b| b.daa_score()), Some(150));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_no_anchor_means_everything_in_scope() {
        let batch = DependencyBatch::new(None, 10);
        assert!(batch.in_scope(&make_block(1, &[], 0)));
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut batch = DependencyBatch::new(None, 2);
        batch.add(make_block(1, &[], 1)).unwrap();
        batch.add(make_block(2, &[], 1)).unwrap();
        let err = batch.add(make_block(3, &[], 1)).unwrap_err();
        assert!(matches!(err, ProcessingError::BatchCapacityExceeded { capacity: 2 }));
    }

    #[test]
    fn test_pop_yields_ancestors_first() {
        // Added child-first, as discovery does.
        let mut batch = DependencyBatch::new(None, 10);
        batch.add(make_block(4, &[2, 3], 4)).unwrap();
        batch.add(make_block(2, &[1], 2)).unwrap();
        batch.add(make_block(3, &[1], 3)).unwrap();
        batch.add(make_block(1, &[], 1)).unwrap();

        let order = drain(&mut batch);
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], hash(1));
        assert_eq!(order[3], hash(4));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_add_after_pop_reorders_remaining() {
        let mut batch = DependencyBatch::new(None, 10);
        batch.add(make_block(3, &[2], 3)).unwrap();
        batch.add(make_block(5, &[], 5)).unwrap();
        assert_eq!(batch.pop().map(|b| b.hash), Some(hash(5)));

        batch.add(make_block(2, &[], 2)).unwrap();
        assert_eq!(drain(&mut batch), vec![hash(2), hash(3)]);
    }

    #[tokio::test]
    async fn test_collect_walks_missing_ancestors() {
        let node = MockNodeClient::new();
        for (n, parents) in [(1u8, vec![]), (2, vec![1]), (3, vec![1]), (4, vec![2, 3]), (5, vec![4])] {
            node.add_block(make_block(n, &parents, n as u64));
        }
        let store = new_store();
        store_block(&store, 1).await;

        let mut batch = DependencyBatch::new(None, 100);
        {
            let tx = store.begin().await;
            batch
                .collect_block_and_dependencies(&tx, &node, make_block(5, &[4], 5))
                .await
                .unwrap();
        }

        assert_eq!(batch.len(), 4);
        assert!(!batch.has(&hash(1)));
        let order = drain(&mut batch);
        assert!(position(&order, 2) < position(&order, 4));
        assert!(position(&order, 3) < position(&order, 4));
        assert_eq!(order.last(), Some(&hash(5)));
    }

    #[tokio::test]
    async fn test_collect_skips_pruned_parent() {
        let node = MockNodeClient::new();
        node.add_block(make_block(2, &[1], 2));
        let store = new_store();

        let mut batch = DependencyBatch::new(None, 100);
        let tx = store.begin().await;
        batch
            .collect_block_and_dependencies(&tx, &node, make_block(3, &[2], 3))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(drain(&mut batch), vec![hash(2), hash(3)]);
    }

    #[tokio::test]
    async fn test_collect_stops_at_anchor_scope() {
        let node = MockNodeClient::new();
        node.add_block(make_block(1, &[], 50));
        node.add_block(make_block(2, &[1], 120));
        let store = new_store();

        let mut batch = DependencyBatch::new(Some(100), 100);
        let tx = store.begin().await;
        batch
            .collect_block_and_dependencies(&tx, &node, make_block(3, &[2], 130))
            .await
            .unwrap();
        drop(tx);

        assert!(batch.has(&hash(2)));
        assert!(!batch.has(&hash(1)));
    }

    #[tokio::test]
    async fn test_collect_propagates_node_failure() {
        let node = MockNodeClient::new();
        node.set_should_fail(true);
        let store = new_store();

        let mut batch = DependencyBatch::new(None, 100);
        let tx = store.begin().await;
        let err = batch
            .collect_block_and_dependencies(&tx, &node, make_block(3, &[2], 3))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::BlockNode { operation: "get_block", .. }));
    }

    #[tokio::test]
    async fn test_collect_direct_dependencies_does_not_recurse() {
        let node = MockNodeClient::new();
        node.add_block(make_block(1, &[], 1));
        node.add_block(make_block(2, &[1], 2));
        let store = new_store();

        let mut batch = DependencyBatch::new(None, 100);
        let tx = store.begin().await;
        batch
            .collect_direct_dependencies(&tx, &node, &make_block(3, &[2], 3))
            .await
            .unwrap();
        drop(tx);

        assert!(batch.has(&hash(2)));
        assert!(!batch.has(&hash(1)));
        assert!(!batch.has(&hash(3)));
    }
}
