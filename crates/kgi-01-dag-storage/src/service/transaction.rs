//! # DAG Transaction
//!
//! A unit of work over the store. Holds the store mutex for its whole life.
//!
//! Writes go to an ordered overlay that reads consult first, so a transaction
//! always sees its own writes. Identity-cache updates for rows written here
//! are staged and only reach the shared cache after the batch write succeeds.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use shared_types::BlockHash;
use tokio::sync::MutexGuard;
use tracing::{debug, warn};

use crate::domain::cache::{CachedIdentity, IdentityCache};
use crate::domain::entities::{AppConfig, Block, BlockColor, BlockId, Edge, HeightGroup, NewBlock};
use crate::domain::errors::StorageError;
use crate::domain::keys::{
    decode_chain_member_key, decode_trailing_id, decode_u32, decode_u64, KeyPrefix, DAG_TABLES,
};
use crate::ports::outbound::{reverse_seek_bound, BatchOperation, KeyValueStore};

/// An open transaction. Commit with [`DagTransaction::commit`]; dropping it
/// without committing rolls everything back.
pub struct DagTransaction<'a, S: KeyValueStore> {
    kv: MutexGuard<'a, S>,
    cache: &'a IdentityCache,
    /// `None` marks a deletion.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    pending_identities: HashMap<BlockHash, CachedIdentity>,
    /// The shared cache is stale for this transaction and is cleared on commit.
    reset_cache: bool,
    committed: bool,
}

impl<'a, S: KeyValueStore> DagTransaction<'a, S> {
    pub(crate) fn new(kv: MutexGuard<'a, S>, cache: &'a IdentityCache) -> Self {
        Self {
            kv,
            cache,
            writes: BTreeMap::new(),
            pending_identities: HashMap::new(),
            reset_cache: false,
            committed: false,
        }
    }

    // =========================================================================
    // COMMIT
    // =========================================================================

    /// Apply every buffered write in one atomic batch, then publish staged
    /// identities to the shared cache.
    pub fn commit(mut self) -> Result<(), StorageError> {
        let operations: Vec<BatchOperation> = std::mem::take(&mut self.writes)
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => BatchOperation::put(key, value),
                None => BatchOperation::delete(key),
            })
            .collect();
        let count = operations.len();

        if !operations.is_empty() {
            self.kv.atomic_batch_write(operations)?;
        }

        if self.reset_cache {
            self.cache.clear();
        }
        for (hash, identity) in self.pending_identities.drain() {
            self.cache.set(hash, identity.id, identity.height);
        }

        self.committed = true;
        debug!(operations = count, "Transaction committed");
        Ok(())
    }

    /// Whether anything has been written.
    pub fn is_dirty(&self) -> bool {
        !self.writes.is_empty()
    }

    // =========================================================================
    // BLOCKS
    // =========================================================================

    /// Whether a block with this hash is stored.
    ///
    /// Cache first; a miss falls back to the hash index and fills the cache.
    /// Never fails for an unknown hash.
    pub fn does_block_exist(&mut self, hash: &BlockHash) -> Result<bool, StorageError> {
        Ok(self.lookup_identity(hash)?.is_some())
    }

    /// Existence check that leaves cache recency untouched.
    pub fn contains_block(&self, hash: &BlockHash) -> Result<bool, StorageError> {
        if self.pending_identities.contains_key(hash) {
            return Ok(true);
        }
        if !self.reset_cache && self.cache.has(hash) {
            return Ok(true);
        }
        self.key_exists(&KeyPrefix::hash_key(hash))
    }

    /// Insert a new block, assigning its surrogate id.
    ///
    /// Fails with [`StorageError::BlockExists`] if the hash is already stored.
    pub fn insert_block(&mut self, new_block: NewBlock) -> Result<Block, StorageError> {
        let hash_key = KeyPrefix::hash_key(&new_block.block_hash);
        if self.key_exists(&hash_key)? {
            return Err(StorageError::BlockExists {
                hash: new_block.block_hash,
            });
        }

        let id = self.next_block_id()?;
        let block = new_block.into_block(id);

        self.put_block(&block)?;
        self.write(hash_key, id.to_be_bytes().to_vec());
        self.write(
            KeyPrefix::height_group_member_key(block.height, block.height_group_index),
            id.to_be_bytes().to_vec(),
        );
        if block.is_in_virtual_selected_parent_chain {
            self.write(KeyPrefix::chain_member_key(block.height, id), Vec::new());
        }
        self.pending_identities.insert(
            block.block_hash,
            CachedIdentity {
                id,
                height: block.height,
            },
        );

        Ok(block)
    }

    pub fn block_by_id(&self, id: BlockId) -> Result<Block, StorageError> {
        let raw = self
            .read(&KeyPrefix::block_key(id))?
            .ok_or(StorageError::BlockIdNotFound { id })?;
        Ok(bincode::deserialize(&raw)?)
    }

    pub fn block_by_hash(&mut self, hash: &BlockHash) -> Result<Block, StorageError> {
        let id = self.block_id_by_hash(hash)?;
        self.block_by_id(id)
    }

    /// Fails with [`StorageError::BlockNotFound`] if the hash is unknown.
    pub fn block_id_by_hash(&mut self, hash: &BlockHash) -> Result<BlockId, StorageError> {
        Ok(self.block_identity_by_hash(hash)?.id)
    }

    /// Id and height of a stored block.
    pub fn block_identity_by_hash(
        &mut self,
        hash: &BlockHash,
    ) -> Result<CachedIdentity, StorageError> {
        self.lookup_identity(hash)?
            .ok_or(StorageError::BlockNotFound { hash: *hash })
    }

    /// Resolve every hash, failing on the first unknown one.
    pub fn block_ids_by_hashes(
        &mut self,
        hashes: &[BlockHash],
    ) -> Result<Vec<BlockId>, StorageError> {
        hashes
            .iter()
            .map(|hash| self.block_id_by_hash(hash))
            .collect()
    }

    /// Resolve every hash to `(ids, heights)`, failing on the first unknown one.
    pub fn block_ids_and_heights_by_hashes(
        &mut self,
        hashes: &[BlockHash],
    ) -> Result<(Vec<BlockId>, Vec<u64>), StorageError> {
        let mut ids = Vec::with_capacity(hashes.len());
        let mut heights = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let identity = self.block_identity_by_hash(hash)?;
            ids.push(identity.id);
            heights.push(identity.height);
        }
        Ok((ids, heights))
    }

    pub fn block_height(&self, id: BlockId) -> Result<u64, StorageError> {
        Ok(self.block_by_id(id)?.height)
    }

    pub fn block_height_group_index(&self, id: BlockId) -> Result<u32, StorageError> {
        Ok(self.block_by_id(id)?.height_group_index)
    }

    /// Greatest height among `ids`; `None` for an empty slice.
    pub fn highest_block_height(&self, ids: &[BlockId]) -> Result<Option<u64>, StorageError> {
        let mut highest = None;
        for id in ids {
            let height = self.block_height(*id)?;
            highest = Some(highest.map_or(height, |h: u64| h.max(height)));
        }
        Ok(highest)
    }

    /// Every stored block, ordered by id.
    pub fn blocks(&self) -> Result<Vec<Block>, StorageError> {
        self.scan(KeyPrefix::Block.as_bytes())?
            .values()
            .map(|raw| bincode::deserialize(raw).map_err(StorageError::from))
            .collect()
    }

    pub fn block_count(&self) -> Result<usize, StorageError> {
        Ok(self.scan(KeyPrefix::BlockHash.as_bytes())?.len())
    }

    /// Id of the block whose DAA score is closest to `daa_score`.
    ///
    /// Ties resolve to the lowest id. `None` when the store is empty.
    pub fn block_id_by_daa_score(&self, daa_score: u64) -> Result<Option<BlockId>, StorageError> {
        Ok(self
            .blocks()?
            .into_iter()
            .min_by_key(|block| block.daa_score.abs_diff(daa_score))
            .map(|block| block.id))
    }

    // =========================================================================
    // FIELD UPDATES
    // =========================================================================

    pub fn update_block_selected_parent(
        &mut self,
        id: BlockId,
        selected_parent_id: BlockId,
    ) -> Result<(), StorageError> {
        self.modify_block(id, |block| block.selected_parent_id = Some(selected_parent_id))
    }

    pub fn update_block_merge_set(
        &mut self,
        id: BlockId,
        merge_set_red_ids: Vec<BlockId>,
        merge_set_blue_ids: Vec<BlockId>,
    ) -> Result<(), StorageError> {
        self.modify_block(id, |block| {
            block.merge_set_red_ids = merge_set_red_ids;
            block.merge_set_blue_ids = merge_set_blue_ids;
        })
    }

    /// Set the color of many blocks at once.
    pub fn update_block_colors(
        &mut self,
        colors: &HashMap<BlockId, BlockColor>,
    ) -> Result<(), StorageError> {
        for (id, color) in colors {
            self.modify_block(*id, |block| block.color = *color)?;
        }
        Ok(())
    }

    /// Set selected-chain membership of many blocks at once, keeping the
    /// chain-member index in step.
    pub fn update_block_is_in_virtual_selected_parent_chain(
        &mut self,
        memberships: &HashMap<BlockId, bool>,
    ) -> Result<(), StorageError> {
        for (id, is_member) in memberships {
            let mut block = self.block_by_id(*id)?;
            block.is_in_virtual_selected_parent_chain = *is_member;
            self.put_block(&block)?;

            let index_key = KeyPrefix::chain_member_key(block.height, block.id);
            if *is_member {
                self.write(index_key, Vec::new());
            } else {
                self.remove(index_key);
            }
        }
        Ok(())
    }

    pub fn update_block_daa_scores(
        &mut self,
        daa_scores: &HashMap<BlockId, u64>,
    ) -> Result<(), StorageError> {
        for (id, daa_score) in daa_scores {
            self.modify_block(*id, |block| block.daa_score = *daa_score)?;
        }
        Ok(())
    }

    pub fn update_block_parent_ids(
        &mut self,
        id: BlockId,
        parent_ids: Vec<BlockId>,
    ) -> Result<(), StorageError> {
        self.modify_block(id, |block| block.parent_ids = parent_ids)
    }

    /// Move a block to `height`, appending it to that height group.
    ///
    /// The last occupant of the old group takes over the vacated slot, so
    /// every group stays dense. The chain index, the identity and the
    /// denormalized layout of every edge touching a moved block follow.
    pub fn relocate_block(&mut self, id: BlockId, height: u64) -> Result<Block, StorageError> {
        let mut block = self.block_by_id(id)?;
        if block.height == height {
            return Ok(block);
        }
        let (old_height, old_index) = (block.height, block.height_group_index);

        let old_size = self.height_group_size(old_height)?;
        let last_index = old_size.saturating_sub(1);
        if last_index != old_index {
            if let Some(moved_id) = self.height_group_member(old_height, last_index)? {
                let mut moved = self.block_by_id(moved_id)?;
                moved.height_group_index = old_index;
                self.put_block(&moved)?;
                self.write(
                    KeyPrefix::height_group_member_key(old_height, old_index),
                    moved_id.to_be_bytes().to_vec(),
                );
                self.refresh_edge_layout(&moved)?;
            }
        }
        self.remove(KeyPrefix::height_group_member_key(old_height, last_index));
        match old_size {
            0 | 1 => self.remove(KeyPrefix::height_group_key(old_height)),
            _ => self.insert_or_update_height_group(HeightGroup {
                height: old_height,
                size: old_size - 1,
            })?,
        }

        let index = self.height_group_size(height)?;
        self.insert_or_update_height_group(HeightGroup {
            height,
            size: index + 1,
        })?;
        self.write(
            KeyPrefix::height_group_member_key(height, index),
            id.to_be_bytes().to_vec(),
        );

        if block.is_in_virtual_selected_parent_chain {
            self.remove(KeyPrefix::chain_member_key(old_height, id));
            self.write(KeyPrefix::chain_member_key(height, id), Vec::new());
        }

        block.height = height;
        block.height_group_index = index;
        self.put_block(&block)?;
        self.refresh_edge_layout(&block)?;
        self.pending_identities
            .insert(block.block_hash, CachedIdentity { id, height });

        debug!(
            block_id = id,
            from_height = old_height,
            to_height = height,
            height_group_index = index,
            "Block relocated"
        );
        Ok(block)
    }

    /// Selected-chain member with the greatest height (ties: greatest id).
    pub fn highest_block_in_virtual_selected_parent_chain(
        &self,
    ) -> Result<Option<Block>, StorageError> {
        match self.last_key(KeyPrefix::ChainMember.as_bytes())? {
            Some(key) => {
                let (_, id) = decode_chain_member_key(&key)?;
                Ok(Some(self.block_by_id(id)?))
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // HEIGHT GROUPS
    // =========================================================================

    /// Number of blocks at `height`; 0 for an unknown height.
    pub fn height_group_size(&self, height: u64) -> Result<u32, StorageError> {
        match self.read(&KeyPrefix::height_group_key(height))? {
            Some(raw) => decode_u32(&raw),
            None => Ok(0),
        }
    }

    /// Block holding slot `index` of the group at `height`.
    pub fn height_group_member(
        &self,
        height: u64,
        index: u32,
    ) -> Result<Option<BlockId>, StorageError> {
        match self.read(&KeyPrefix::height_group_member_key(height, index))? {
            Some(raw) => Ok(Some(decode_u64(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn height_group(&self, height: u64) -> Result<Option<HeightGroup>, StorageError> {
        match self.read(&KeyPrefix::height_group_key(height))? {
            Some(raw) => Ok(Some(HeightGroup {
                height,
                size: decode_u32(&raw)?,
            })),
            None => Ok(None),
        }
    }

    /// Insert the group or replace its size.
    pub fn insert_or_update_height_group(&mut self, group: HeightGroup) -> Result<(), StorageError> {
        self.write(
            KeyPrefix::height_group_key(group.height),
            group.size.to_be_bytes().to_vec(),
        );
        Ok(())
    }

    // =========================================================================
    // EDGES
    // =========================================================================

    /// Insert an edge. An existing `(from, to)` edge is left as it is.
    pub fn insert_edge(&mut self, edge: &Edge) -> Result<(), StorageError> {
        let key = KeyPrefix::edge_key(edge.from_block_id, edge.to_block_id);
        if self.key_exists(&key)? {
            debug!(
                from = edge.from_block_id,
                to = edge.to_block_id,
                "Edge already stored"
            );
            return Ok(());
        }
        self.write(key, bincode::serialize(edge)?);
        self.write(
            KeyPrefix::child_edge_key(edge.to_block_id, edge.from_block_id),
            Vec::new(),
        );
        Ok(())
    }

    /// Edges leaving `from`, ordered by target id.
    pub fn edges_from(&self, from: BlockId) -> Result<Vec<Edge>, StorageError> {
        self.decode_rows(&KeyPrefix::edges_from_prefix(from))
    }

    /// Edges arriving at `to`, ordered by source id.
    pub fn edges_to(&self, to: BlockId) -> Result<Vec<Edge>, StorageError> {
        let mut edges = Vec::new();
        for key in self.scan(&KeyPrefix::child_edges_prefix(to))?.into_keys() {
            let from = decode_trailing_id(&key)?;
            let raw = self
                .read(&KeyPrefix::edge_key(from, to))?
                .ok_or_else(|| StorageError::Corruption {
                    message: format!("reverse index lists edge {from} -> {to} which is not stored"),
                })?;
            edges.push(bincode::deserialize(&raw)?);
        }
        Ok(edges)
    }

    /// Every stored edge, ordered by `(from, to)`.
    pub fn edges(&self) -> Result<Vec<Edge>, StorageError> {
        self.decode_rows(KeyPrefix::Edge.as_bytes())
    }

    // =========================================================================
    // WAITING CHILDREN
    // =========================================================================

    /// Record that stored block `child` lists `parent` but was inserted
    /// without it.
    pub fn add_waiting_child(&mut self, parent: &BlockHash, child: BlockId) {
        self.write(KeyPrefix::waiting_child_key(parent, child), Vec::new());
    }

    /// Children waiting for `parent`, removing their markers.
    pub fn take_waiting_children(&mut self, parent: &BlockHash) -> Result<Vec<BlockId>, StorageError> {
        let keys: Vec<Vec<u8>> = self
            .scan(&KeyPrefix::waiting_children_prefix(parent))?
            .into_keys()
            .collect();
        let mut children = Vec::with_capacity(keys.len());
        for key in keys {
            children.push(decode_trailing_id(&key)?);
            self.remove(key);
        }
        Ok(children)
    }

    // =========================================================================
    // RESYNC SUPPORT
    // =========================================================================

    /// Index of the last stored hash in an oldest-to-newest sequence.
    ///
    /// Binary search: assumes that stored hashes form a prefix of `hashes`.
    /// Index 0 is never tested, so the result is 0 both when only the first
    /// hash is stored and when none is. Cache recency is not affected.
    pub fn find_latest_stored_block_index(
        &self,
        hashes: &[BlockHash],
    ) -> Result<usize, StorageError> {
        let mut low = 0usize;
        let mut high = hashes.len();
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            if self.contains_block(&hashes[mid])? {
                low = mid;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    /// Wipe blocks, edges, height groups and the chain index.
    ///
    /// The id sequence and app config survive. Irreversible once committed.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        let mut removed = 0usize;
        for table in DAG_TABLES {
            let keys: Vec<Vec<u8>> = self.scan(table.as_bytes())?.into_keys().collect();
            removed += keys.len();
            for key in keys {
                self.remove(key);
            }
        }
        self.pending_identities.clear();
        self.reset_cache = true;
        warn!(rows = removed, "DAG tables cleared");
        Ok(())
    }

    /// Rebuild the identity cache from stored blocks with height ≥ `min_height`.
    ///
    /// The previous cache content is dropped on commit. Returns the number of
    /// identities loaded.
    pub fn load_cache(&mut self, min_height: u64) -> Result<usize, StorageError> {
        self.pending_identities.clear();
        self.reset_cache = true;
        for block in self.blocks()? {
            if block.height >= min_height {
                self.pending_identities.insert(
                    block.block_hash,
                    CachedIdentity {
                        id: block.id,
                        height: block.height,
                    },
                );
            }
        }
        let loaded = self.pending_identities.len();
        debug!(loaded, min_height, "Identity cache reloaded");
        Ok(loaded)
    }

    // =========================================================================
    // APP CONFIG
    // =========================================================================

    pub fn upsert_app_config(&mut self, config: &AppConfig) -> Result<(), StorageError> {
        self.write(KeyPrefix::app_config_key(), bincode::serialize(config)?);
        Ok(())
    }

    pub fn app_config(&self) -> Result<Option<AppConfig>, StorageError> {
        match self.read(&KeyPrefix::app_config_key())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn lookup_identity(&mut self, hash: &BlockHash) -> Result<Option<CachedIdentity>, StorageError> {
        if let Some(identity) = self.pending_identities.get(hash) {
            return Ok(Some(*identity));
        }
        if !self.reset_cache {
            if let Some(identity) = self.cache.get(hash) {
                return Ok(Some(identity));
            }
        }

        let hash_key = KeyPrefix::hash_key(hash);
        let Some(raw_id) = self.read(&hash_key)? else {
            return Ok(None);
        };
        let id = decode_u64(&raw_id)?;
        let block = self.block_by_id(id)?;
        if block.block_hash != *hash {
            return Err(StorageError::Corruption {
                message: format!("hash index for {hash} points at block {id} ({})", block.block_hash),
            });
        }

        let identity = CachedIdentity {
            id,
            height: block.height,
        };
        // Rows that are already durable can go straight to the shared cache.
        if self.reset_cache || self.writes.contains_key(&hash_key) {
            self.pending_identities.insert(*hash, identity);
        } else {
            self.cache.set(*hash, id, block.height);
        }
        Ok(Some(identity))
    }

    /// Rewrite the denormalized layout of every edge touching `block`.
    fn refresh_edge_layout(&mut self, block: &Block) -> Result<(), StorageError> {
        for mut edge in self.edges_from(block.id)? {
            edge.from_height = block.height;
            edge.from_height_group_index = block.height_group_index;
            self.put_edge(&edge)?;
        }
        for mut edge in self.edges_to(block.id)? {
            edge.to_height = block.height;
            edge.to_height_group_index = block.height_group_index;
            self.put_edge(&edge)?;
        }
        Ok(())
    }

    fn put_edge(&mut self, edge: &Edge) -> Result<(), StorageError> {
        self.write(
            KeyPrefix::edge_key(edge.from_block_id, edge.to_block_id),
            bincode::serialize(edge)?,
        );
        Ok(())
    }

    fn next_block_id(&mut self) -> Result<BlockId, StorageError> {
        let key = KeyPrefix::next_block_id_key();
        let id = match self.read(&key)? {
            Some(raw) => decode_u64(&raw)?,
            None => 1,
        };
        self.write(key, (id + 1).to_be_bytes().to_vec());
        Ok(id)
    }

    fn modify_block<F>(&mut self, id: BlockId, change: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut Block),
    {
        let mut block = self.block_by_id(id)?;
        change(&mut block);
        self.put_block(&block)
    }

    fn put_block(&mut self, block: &Block) -> Result<(), StorageError> {
        self.write(KeyPrefix::block_key(block.id), bincode::serialize(block)?);
        Ok(())
    }

    fn decode_rows<T: serde::de::DeserializeOwned>(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<T>, StorageError> {
        self.scan(prefix)?
            .values()
            .map(|raw| bincode::deserialize(raw).map_err(StorageError::from))
            .collect()
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        match self.writes.get(key) {
            Some(value) => Ok(value.clone()),
            None => Ok(self.kv.get(key)?),
        }
    }

    fn key_exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        match self.writes.get(key) {
            Some(value) => Ok(value.is_some()),
            None => Ok(self.kv.exists(key)?),
        }
    }

    fn scan(&self, prefix: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StorageError> {
        let mut rows: BTreeMap<Vec<u8>, Vec<u8>> =
            self.kv.prefix_scan(prefix)?.into_iter().collect();
        let staged = self
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix));
        for (key, value) in staged {
            match value {
                Some(value) => {
                    rows.insert(key.clone(), value.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        Ok(rows)
    }

    /// Greatest live key under `prefix`, merging staged writes with a reverse
    /// seek of the backend. Backend keys deleted here are stepped over.
    fn last_key(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let upper = match reverse_seek_bound(prefix, None) {
            Some(bound) => Bound::Excluded(bound),
            None => Bound::Unbounded,
        };
        let staged = self
            .writes
            .range::<Vec<u8>, _>((Bound::Included(prefix.to_vec()), upper))
            .rev()
            .find(|(_, value)| value.is_some())
            .map(|(key, _)| key.clone());

        let mut before: Option<Vec<u8>> = None;
        let durable = loop {
            match self.kv.last_with_prefix(prefix, before.as_deref())? {
                Some((key, _)) if matches!(self.writes.get(&key), Some(None)) => {
                    before = Some(key);
                }
                Some((key, _)) => break Some(key),
                None => break None,
            }
        };
        Ok(staged.max(durable))
    }

    fn write(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    fn remove(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }
}

impl<S: KeyValueStore> Drop for DagTransaction<'_, S> {
    fn drop(&mut self) {
        if !self.committed && !self.writes.is_empty() {
            debug!(
                discarded = self.writes.len(),
                "Transaction rolled back"
            );
        }
    }
}
