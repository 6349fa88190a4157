//! # Integration Tests
//!
//! Scenarios spanning storage, processing and the runtime adapters.

pub mod dag_scenarios;
pub mod event_flow;
pub mod persistence;

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::Path;
    use std::sync::Arc;

    use kgi_01_dag_storage::{Block, DagStore, KeyValueStore, StoreConfig};
    use kgi_02_dag_processing::test_utils::hash;
    use kgi_02_dag_processing::{MockNodeClient, ProcessingConfig, ResyncEngine};
    use processing_runtime::adapters::{RocksDbConfig, RocksDbStore};

    pub type RocksEngine = ResyncEngine<RocksDbStore, MockNodeClient>;

    pub fn open_store(path: &Path, cache_capacity: usize) -> Arc<DagStore<RocksDbStore>> {
        let kv = RocksDbStore::open(RocksDbConfig::for_testing(path)).unwrap();
        Arc::new(DagStore::new(kv, StoreConfig { cache_capacity }))
    }

    /// Engine over a RocksDB store at `path`.
    pub fn rocks_engine(
        path: &Path,
        node: Arc<MockNodeClient>,
        config: ProcessingConfig,
    ) -> (RocksEngine, Arc<DagStore<RocksDbStore>>) {
        let store = open_store(path, config.cache_capacity);
        let engine = ResyncEngine::new(Arc::clone(&store), node, config);
        (engine, store)
    }

    pub async fn stored<S: KeyValueStore>(store: &DagStore<S>, n: u8) -> Block {
        store
            .run_in_transaction(|tx| tx.block_by_hash(&hash(n)))
            .await
            .unwrap()
    }

    pub async fn is_stored<S: KeyValueStore>(store: &DagStore<S>, n: u8) -> bool {
        store
            .run_in_transaction(|tx| tx.does_block_exist(&hash(n)))
            .await
            .unwrap()
    }

    /// Every edge points at a lower block, and both ends exist.
    pub async fn assert_edges_descend<S: KeyValueStore>(store: &DagStore<S>) {
        let tx = store.begin().await;
        for edge in tx.edges().unwrap() {
            let from = tx.block_by_id(edge.from_block_id).unwrap();
            let to = tx.block_by_id(edge.to_block_id).unwrap();
            assert!(to.height < from.height, "edge {edge:?} does not descend");
            assert_eq!(edge.from_height, from.height);
            assert_eq!(edge.to_height, to.height);
        }
    }
}
