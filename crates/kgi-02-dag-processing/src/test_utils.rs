//! DAG builders for tests.
//!
//! Block `n` has hash `[n; 32]`, timestamp `1000 + n`, its first parent as
//! selected parent and all parents in its blue merge set.

use std::sync::Arc;

use kgi_01_dag_storage::{DagStore, InMemoryKVStore, StoreConfig};
use shared_types::{BlockHash, RpcBlock, RpcBlockHeader, RpcBlockVerboseData};

use crate::application::ResyncEngine;
use crate::config::ProcessingConfig;
use crate::ports::MockNodeClient;

pub fn hash(n: u8) -> BlockHash {
    BlockHash::from_bytes([n; 32])
}

pub fn make_block(n: u8, parents: &[u8], daa_score: u64) -> RpcBlock {
    let direct_parents: Vec<BlockHash> = parents.iter().copied().map(hash).collect();
    RpcBlock {
        hash: hash(n),
        header: RpcBlockHeader {
            timestamp: 1000 + n as i64,
            daa_score,
            direct_parents: direct_parents.clone(),
        },
        verbose_data: Some(RpcBlockVerboseData {
            is_header_only: false,
            selected_parent_hash: direct_parents.first().copied(),
            merge_set_reds_hashes: Vec::new(),
            merge_set_blues_hashes: direct_parents,
        }),
    }
}

/// Same block without validated body data.
pub fn header_only(mut block: RpcBlock) -> RpcBlock {
    if let Some(verbose) = block.verbose_data.as_mut() {
        verbose.is_header_only = true;
        verbose.selected_parent_hash = None;
        verbose.merge_set_blues_hashes.clear();
        verbose.merge_set_reds_hashes.clear();
    }
    block
}

/// Override the merge sets of a block.
pub fn with_merge_set(mut block: RpcBlock, blues: &[u8], reds: &[u8]) -> RpcBlock {
    if let Some(verbose) = block.verbose_data.as_mut() {
        verbose.merge_set_blues_hashes = blues.iter().copied().map(hash).collect();
        verbose.merge_set_reds_hashes = reds.iter().copied().map(hash).collect();
    }
    block
}

/// Mock node holding a linear chain `0..len`, pruning point 0, DAA = 100 + n.
pub fn linear_node(len: u8) -> MockNodeClient {
    let node = MockNodeClient::new();
    node.add_block(make_block(0, &[], 100));
    for n in 1..len {
        node.add_block(make_block(n, &[n - 1], 100 + n as u64));
    }
    node.set_pruning_point(hash(0));
    node.set_selected_chain((0..len).map(hash).collect());
    node
}

pub type TestEngine = ResyncEngine<InMemoryKVStore, MockNodeClient>;

/// Engine over an empty in-memory store, returning the shared store and node.
pub fn test_engine(
    node: MockNodeClient,
    config: ProcessingConfig,
) -> (TestEngine, Arc<DagStore<InMemoryKVStore>>, Arc<MockNodeClient>) {
    let store = Arc::new(DagStore::new(
        InMemoryKVStore::new(),
        StoreConfig {
            cache_capacity: config.cache_capacity,
        },
    ));
    let node = Arc::new(node);
    let engine = ResyncEngine::new(Arc::clone(&store), Arc::clone(&node), config);
    (engine, store, node)
}
