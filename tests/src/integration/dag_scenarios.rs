//! # DAG Scenarios
//!
//! Dependency ordering and selected-chain reconciliation over RocksDB.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kgi_01_dag_storage::BlockColor;
    use kgi_02_dag_processing::test_utils::{hash, linear_node, make_block, with_merge_set};
    use kgi_02_dag_processing::{MockNodeClient, ProcessingApi, ProcessingConfig, ResyncMode};
    use shared_types::VirtualChainChange;
    use tempfile::TempDir;

    use crate::integration::fixtures::{assert_edges_descend, is_stored, rocks_engine, stored};

    // =========================================================================
    // DEPENDENCY ORDERING
    // =========================================================================

    /// A(0) ← B, C; B ← D. D arrives before B and C are stored.
    #[tokio::test]
    async fn test_block_arriving_before_its_parents() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(linear_node(1));
        let (engine, store) = rocks_engine(dir.path(), Arc::clone(&node), ProcessingConfig::for_testing());
        assert_eq!(engine.resync_database().await.unwrap().mode, ResyncMode::Full);

        node.add_block(make_block(1, &[0], 101));
        node.add_block(make_block(2, &[0], 102));
        node.add_block(make_block(3, &[1], 103));

        let outcomes = engine
            .process_block_and_dependencies(make_block(3, &[1], 103))
            .await
            .unwrap();
        let order: Vec<u64> = outcomes.iter().map(|o| o.height).collect();
        assert_eq!(order, vec![1, 2]);

        engine
            .process_block_and_dependencies(make_block(2, &[0], 102))
            .await
            .unwrap();

        let (a, b, c, d) = (
            stored(&store, 0).await,
            stored(&store, 1).await,
            stored(&store, 2).await,
            stored(&store, 3).await,
        );
        assert_eq!((a.height, b.height, c.height, d.height), (0, 1, 1, 2));

        let edges = store.run_in_transaction(|tx| tx.edges()).await.unwrap();
        let mut pairs: Vec<(u64, u64)> = edges.iter().map(|e| (e.from_block_id, e.to_block_id)).collect();
        pairs.sort_unstable();
        let mut expected = vec![(b.id, a.id), (c.id, a.id), (d.id, b.id)];
        expected.sort_unstable();
        assert_eq!(pairs, expected);
        assert_edges_descend(&store).await;
    }

    /// A diamond with a long tail: every ancestor still missing is fetched,
    /// and each is stored before any of its children.
    #[tokio::test]
    async fn test_deep_backfill_orders_ancestors_first() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(linear_node(1));
        let (engine, store) = rocks_engine(dir.path(), Arc::clone(&node), ProcessingConfig::for_testing());
        engine.resync_database().await.unwrap();

        node.add_block(make_block(1, &[0], 101));
        node.add_block(make_block(2, &[0], 102));
        node.add_block(make_block(3, &[1, 2], 103));
        for n in 4..12u8 {
            node.add_block(make_block(n, &[n - 1], 100 + n as u64));
        }

        let outcomes = engine
            .process_block_and_dependencies(make_block(11, &[10], 111))
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 11);
        assert!(outcomes.iter().all(|o| o.inserted && o.complete));

        let diamond = stored(&store, 3).await;
        assert_eq!(diamond.height, 2);
        assert_eq!(diamond.parent_ids.len(), 2);
        assert_eq!(stored(&store, 11).await.height, 10);
        assert_edges_descend(&store).await;
    }

    /// Parents older than the anchor are out of scope and never fetched.
    #[tokio::test]
    async fn test_pruned_parent_is_dropped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(linear_node(1));
        let (engine, store) = rocks_engine(dir.path(), Arc::clone(&node), ProcessingConfig::for_testing());
        engine.resync_database().await.unwrap();

        // Parent 40 is unknown to the node entirely.
        node.add_block(make_block(1, &[0, 40], 101));
        let outcomes = engine
            .process_block_and_dependencies(make_block(1, &[0, 40], 101))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].complete);
        assert!(is_stored(&store, 1).await);
        assert!(!is_stored(&store, 40).await);
    }

    // =========================================================================
    // CHAIN RECONCILIATION
    // =========================================================================

    /// DAG: 0 ← 1 (Z), 0 ← 2 (X), 0 ← 4 (W), {2, 4} ← 3 (Y).
    /// The chain moves from [0, Z] to [0, X, Y].
    fn forked_node() -> MockNodeClient {
        let node = MockNodeClient::new();
        node.add_block(make_block(0, &[], 100));
        node.add_block(make_block(1, &[0], 101));
        node.add_block(make_block(2, &[0], 102));
        node.add_block(make_block(4, &[0], 104));
        node.add_block(with_merge_set(make_block(3, &[2, 4], 105), &[2], &[4]));
        node.set_pruning_point(hash(0));
        node.set_selected_chain(vec![hash(0), hash(1)]);
        node
    }

    #[tokio::test]
    async fn test_chain_change_moves_membership_and_recolors() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(forked_node());
        let (engine, store) = rocks_engine(dir.path(), Arc::clone(&node), ProcessingConfig::for_testing());
        engine.resync_database().await.unwrap();
        assert!(stored(&store, 1).await.is_in_virtual_selected_parent_chain);

        node.set_selected_chain(vec![hash(0), hash(2), hash(3)]);
        let change = VirtualChainChange {
            removed_chain_block_hashes: vec![hash(1)],
            added_chain_block_hashes: vec![hash(2), hash(3)],
        };
        let reconciliation = engine.process_virtual_change(&change).await.unwrap();
        assert_eq!(reconciliation.removed, 1);
        assert_eq!(reconciliation.added, 2);
        assert_eq!(reconciliation.backfilled, 0);

        let z = stored(&store, 1).await;
        assert!(!z.is_in_virtual_selected_parent_chain);
        assert_eq!(z.color, BlockColor::Gray);

        let x = stored(&store, 2).await;
        let y = stored(&store, 3).await;
        assert!(x.is_in_virtual_selected_parent_chain);
        assert!(y.is_in_virtual_selected_parent_chain);

        // X's merge set is {0}; Y's is blue {X}, red {W}.
        assert_eq!(stored(&store, 0).await.color, BlockColor::Blue);
        assert_eq!(x.color, BlockColor::Blue);
        assert_eq!(stored(&store, 4).await.color, BlockColor::Red);

        let highest = store
            .run_in_transaction(|tx| tx.highest_block_in_virtual_selected_parent_chain())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(highest.block_hash, hash(3));
    }

    /// A chain change naming blocks the store has never seen backfills them.
    #[tokio::test]
    async fn test_chain_change_ahead_of_blocks_backfills() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(linear_node(3));
        let (engine, store) = rocks_engine(dir.path(), Arc::clone(&node), ProcessingConfig::for_testing());
        engine.resync_database().await.unwrap();

        node.add_block(make_block(3, &[2], 103));
        node.add_block(make_block(4, &[3], 104));
        node.set_selected_chain((0..5).map(hash).collect());

        let reconciliation = engine
            .resync_virtual_selected_parent_chain()
            .await
            .unwrap();
        assert_eq!(reconciliation.added, 2);
        assert_eq!(reconciliation.backfilled, 2);
        assert!(stored(&store, 4).await.is_in_virtual_selected_parent_chain);
        assert_eq!(stored(&store, 3).await.color, BlockColor::Blue);
        assert_edges_descend(&store).await;
    }
}
