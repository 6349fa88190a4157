//! # Persistence
//!
//! Restarts against the same RocksDB directory, cache behaviour under
//! pressure, and the stored-prefix search.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use kgi_01_dag_storage::{BlockColor, BlockId, DagStore, NewBlock};
    use kgi_02_dag_processing::test_utils::{hash, linear_node, make_block};
    use kgi_02_dag_processing::{ProcessingApi, ProcessingConfig, ResyncMode};
    use processing_runtime::adapters::RocksDbStore;
    use shared_types::BlockHash;
    use tempfile::TempDir;

    use crate::integration::fixtures::{assert_edges_descend, open_store, rocks_engine, stored};

    async fn ids_by_hash(store: &DagStore<RocksDbStore>) -> HashMap<BlockHash, BlockId> {
        let tx = store.begin().await;
        tx.blocks()
            .unwrap()
            .into_iter()
            .map(|block| (block.block_hash, block.id))
            .collect()
    }

    #[tokio::test]
    async fn test_restart_resumes_incrementally() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(linear_node(12));

        let before = {
            let (engine, store) = rocks_engine(dir.path(), Arc::clone(&node), ProcessingConfig::for_testing());
            let report = engine.resync_database().await.unwrap();
            assert_eq!(report.mode, ResyncMode::Full);
            assert!(report.converged);
            ids_by_hash(&store).await
        };
        assert_eq!(before.len(), 12);

        for n in 12..15u8 {
            node.add_block(make_block(n, &[n - 1], 100 + n as u64));
        }
        node.set_selected_chain((0..15).map(hash).collect());

        let (engine, store) = rocks_engine(dir.path(), Arc::clone(&node), ProcessingConfig::for_testing());
        let report = engine.resync_database().await.unwrap();
        assert_eq!(report.mode, ResyncMode::Incremental);

        let after = ids_by_hash(&store).await;
        assert_eq!(after.len(), 15);
        for (block_hash, id) in &before {
            assert_eq!(after.get(block_hash), Some(id), "id of {block_hash} changed");
        }
        let max_before = before.values().copied().max().unwrap();
        assert!(after[&hash(12)] > max_before);
        assert!(stored(&store, 14).await.is_in_virtual_selected_parent_chain);
        assert_edges_descend(&store).await;
    }

    /// The node pruned past everything stored while the indexer was down.
    #[tokio::test]
    async fn test_restart_after_pruning_point_moved_rebuilds() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(linear_node(6));
        {
            let (engine, _store) = rocks_engine(dir.path(), Arc::clone(&node), ProcessingConfig::for_testing());
            engine.resync_database().await.unwrap();
        }

        for n in 6..10u8 {
            node.add_block(make_block(n, &[n - 1], 100 + n as u64));
        }
        for n in 0..7u8 {
            node.remove_block(&hash(n));
        }
        node.set_pruning_point(hash(7));
        node.set_selected_chain((7..10).map(hash).collect());

        let (engine, store) = rocks_engine(dir.path(), Arc::clone(&node), ProcessingConfig::for_testing());
        let report = engine.resync_database().await.unwrap();
        assert_eq!(report.mode, ResyncMode::Full);

        let anchor = stored(&store, 7).await;
        assert_eq!(anchor.height, 0);
        assert_eq!(stored(&store, 9).await.height, 2);
        let mut tx = store.begin().await;
        assert_eq!(tx.block_count().unwrap(), 3);
        assert!(!tx.does_block_exist(&hash(5)).unwrap());
    }

    /// A cache far smaller than the DAG only costs lookups, never answers.
    #[tokio::test]
    async fn test_tiny_cache_agrees_with_store() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(linear_node(40));
        let config = ProcessingConfig {
            cache_capacity: 4,
            ..ProcessingConfig::for_testing()
        };
        let (engine, store) = rocks_engine(dir.path(), Arc::clone(&node), config);
        engine.resync_database().await.unwrap();
        assert!(store.cache().len() <= 4);

        let mut tx = store.begin().await;
        let mut ids = Vec::new();
        for n in 0..40u8 {
            assert!(tx.does_block_exist(&hash(n)).unwrap());
            ids.push(tx.block_id_by_hash(&hash(n)).unwrap());
        }
        store.cache().clear();
        for n in 0..40u8 {
            assert_eq!(tx.block_id_by_hash(&hash(n)).unwrap(), ids[n as usize]);
        }
        assert_eq!(tx.block_by_hash(&hash(39)).unwrap().color, BlockColor::Gray);
    }

    #[tokio::test]
    async fn test_reopened_store_serves_cold_cache() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(linear_node(5));
        let expected = {
            let (engine, store) = rocks_engine(dir.path(), node, ProcessingConfig::for_testing());
            engine.resync_database().await.unwrap();
            ids_by_hash(&store).await
        };

        let store = open_store(dir.path(), 16);
        assert!(store.cache().is_empty());
        let mut tx = store.begin().await;
        for (block_hash, id) in &expected {
            assert_eq!(tx.block_id_by_hash(block_hash).unwrap(), *id);
        }
        assert_eq!(tx.load_cache(0).unwrap(), 5);
    }

    /// The stored-prefix search over RocksDB, for every boundary position.
    #[tokio::test]
    async fn test_latest_stored_index_over_rocksdb() {
        let hashes: Vec<BlockHash> = (1..=20u8).map(hash).collect();
        for stored_len in [1usize, 2, 7, 19, 20] {
            let dir = TempDir::new().unwrap();
            let store = open_store(dir.path(), 8);
            let mut tx = store.begin().await;
            for (height, block_hash) in hashes[..stored_len].iter().enumerate() {
                tx.insert_block(NewBlock {
                    block_hash: *block_hash,
                    timestamp: height as i64,
                    parent_ids: vec![],
                    height: height as u64,
                    height_group_index: 0,
                    color: BlockColor::Gray,
                    is_in_virtual_selected_parent_chain: false,
                    daa_score: height as u64,
                })
                .unwrap();
            }
            tx.commit().unwrap();

            store.cache().clear();
            let tx = store.begin().await;
            assert_eq!(
                tx.find_latest_stored_block_index(&hashes).unwrap(),
                stored_len - 1,
                "prefix of {stored_len}"
            );
        }
    }
}
