//! # Event Flow
//!
//! Node events published on the shared bus, consumed by the runtime's event
//! handler and applied by the engine.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kgi_01_dag_storage::BlockColor;
    use kgi_02_dag_processing::test_utils::{hash, linear_node, make_block};
    use kgi_02_dag_processing::{ProcessingApi, ProcessingConfig};
    use processing_runtime::handlers::{HandlerError, NodeEventHandler};
    use shared_bus::{event_channel, EventPublisher, NodeEvent};
    use shared_types::VirtualChainChange;
    use tempfile::TempDir;

    use crate::integration::fixtures::{assert_edges_descend, rocks_engine, stored};

    #[tokio::test]
    async fn test_notifications_outrunning_their_blocks() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(linear_node(3));
        let (engine, store) = rocks_engine(dir.path(), Arc::clone(&node), ProcessingConfig::for_testing());
        engine.resync_database().await.unwrap();

        // The node accepted 3, 4 and 5, but only 5 is announced.
        for n in 3..6u8 {
            node.add_block(make_block(n, &[n - 1], 100 + n as u64));
        }
        node.set_selected_chain((0..6).map(hash).collect());

        let (bus, events) = event_channel(16);
        let mut handler = NodeEventHandler::new(Arc::new(engine), events);
        bus.publish(NodeEvent::BlockAdded(make_block(5, &[4], 105)))
            .await
            .unwrap();
        bus.publish(NodeEvent::VirtualChainChanged(VirtualChainChange {
            removed_chain_block_hashes: vec![],
            added_chain_block_hashes: vec![hash(3), hash(4), hash(5)],
        }))
        .await
        .unwrap();
        drop(bus);

        assert!(matches!(handler.run().await, Err(HandlerError::StreamClosed)));
        assert_eq!(handler.handled(), 2);

        for n in 3..6u8 {
            let block = stored(&store, n).await;
            assert_eq!(block.height, n as u64);
            assert!(block.is_in_virtual_selected_parent_chain);
        }
        assert_eq!(stored(&store, 4).await.color, BlockColor::Blue);
        assert_edges_descend(&store).await;
    }

    #[tokio::test]
    async fn test_reconnect_event_catches_up_missed_blocks() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(linear_node(4));
        let (engine, store) = rocks_engine(dir.path(), Arc::clone(&node), ProcessingConfig::for_testing());
        engine.resync_database().await.unwrap();

        // Blocks accepted while the connection was down are never announced.
        for n in 4..9u8 {
            node.add_block(make_block(n, &[n - 1], 100 + n as u64));
        }
        node.set_selected_chain((0..9).map(hash).collect());

        let (bus, events) = event_channel(4);
        let mut handler = NodeEventHandler::new(Arc::new(engine), events);
        bus.publish(NodeEvent::Reconnected).await.unwrap();
        drop(bus);

        assert!(matches!(handler.run().await, Err(HandlerError::StreamClosed)));
        let count = store.run_in_transaction(|tx| tx.block_count()).await.unwrap();
        assert_eq!(count, 9);
        assert!(stored(&store, 8).await.is_in_virtual_selected_parent_chain);
    }

    /// Live blocks racing a resync are serialized by the engine; each block
    /// ends up stored exactly once.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_live_blocks_during_resync() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(linear_node(10));
        let (engine, store) = rocks_engine(dir.path(), Arc::clone(&node), ProcessingConfig::for_testing());
        engine.resync_database().await.unwrap();
        for n in 10..30u8 {
            node.add_block(make_block(n, &[n - 1], 100 + n as u64));
        }
        node.set_selected_chain((0..30).map(hash).collect());
        let engine = Arc::new(engine);

        let resync = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.resync_database().await })
        };
        let live: Vec<_> = (10..30u8)
            .map(|n| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine
                        .process_block_and_dependencies(make_block(n, &[n - 1], 100 + n as u64))
                        .await
                })
            })
            .collect();

        resync.await.unwrap().unwrap();
        for task in live {
            task.await.unwrap().unwrap();
        }

        let tx = store.begin().await;
        assert_eq!(tx.block_count().unwrap(), 30);
        for height in 0..30u64 {
            assert_eq!(tx.height_group_size(height).unwrap(), 1, "height {height}");
        }
    }
}
