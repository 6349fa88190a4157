//! # Node Event Handler
//!
//! Drives the processing engine from the node's notification stream, one
//! event at a time, in delivery order.
//!
//! | Event | Operation |
//! |-------|-----------|
//! | `BlockAdded` | `process_block_and_dependencies` |
//! | `VirtualChainChanged` | `process_virtual_change` |
//! | `Reconnected` | `resync_database` |

use std::sync::Arc;

use kgi_02_dag_processing::{ProcessingApi, ProcessingError};
use kgi_telemetry::log_block_event;
use shared_bus::{EventStream, EventTopic, NodeEvent};
use thiserror::Error;
use tracing::{debug, info, warn};

const SUBSYSTEM: &str = "node-events";

/// Why the handler stopped.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("failed to handle {topic:?} event: {source}")]
    Processing {
        topic: EventTopic,
        #[source]
        source: ProcessingError,
    },

    #[error("node event stream closed")]
    StreamClosed,
}

/// Single consumer of node events.
pub struct NodeEventHandler<P: ProcessingApi + ?Sized> {
    api: Arc<P>,
    events: EventStream,
    handled: u64,
}

impl<P: ProcessingApi + ?Sized> NodeEventHandler<P> {
    pub fn new(api: Arc<P>, events: EventStream) -> Self {
        Self {
            api,
            events,
            handled: 0,
        }
    }

    /// Number of events handled successfully.
    pub fn handled(&self) -> u64 {
        self.handled
    }

    /// Handle events until one fails or the stream ends.
    ///
    /// Never returns `Ok`: the stream ending is itself an error, since the
    /// store stops tracking the node from then on.
    pub async fn run(&mut self) -> Result<(), HandlerError> {
        info!("Listening for node events");
        while let Some(event) = self.events.recv().await {
            let topic = event.topic();
            self.handle(event)
                .await
                .map_err(|source| HandlerError::Processing { topic, source })?;
            self.handled += 1;
        }
        warn!(handled = self.handled, "Node event stream ended");
        Err(HandlerError::StreamClosed)
    }

    /// Apply one event.
    pub async fn handle(&self, event: NodeEvent) -> Result<(), ProcessingError> {
        match event {
            NodeEvent::BlockAdded(block) => {
                let block_hash = block.hash;
                let outcomes = self.api.process_block_and_dependencies(block).await?;
                log_block_event!(
                    debug,
                    SUBSYSTEM,
                    "Block-added notification handled",
                    block_hash,
                    processed = outcomes.len()
                );
            }
            NodeEvent::VirtualChainChanged(change) => {
                let reconciliation = self.api.process_virtual_change(&change).await?;
                debug!(
                    removed = reconciliation.removed,
                    added = reconciliation.added,
                    "Virtual-chain-changed notification handled"
                );
            }
            NodeEvent::Reconnected => {
                info!("Reconnected to node, resyncing");
                let report = self.api.resync_database().await?;
                info!(
                    cycles = report.cycles,
                    blocks_processed = report.blocks_processed,
                    converged = report.converged,
                    "Resync after reconnect finished"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgi_01_dag_storage::BlockColor;
    use kgi_02_dag_processing::test_utils::{hash, linear_node, make_block, test_engine};
    use kgi_02_dag_processing::ProcessingConfig;
    use shared_bus::{event_channel, EventPublisher};
    use shared_types::VirtualChainChange;

    #[tokio::test]
    async fn test_events_drive_the_engine() {
        let (engine, store, node) = test_engine(linear_node(4), ProcessingConfig::for_testing());
        engine.resync_database().await.unwrap();

        let (bus, events) = event_channel(8);
        let mut handler = NodeEventHandler::new(Arc::new(engine), events);

        node.add_block(make_block(4, &[3], 104));
        bus.publish(NodeEvent::BlockAdded(make_block(4, &[3], 104)))
            .await
            .unwrap();
        bus.publish(NodeEvent::VirtualChainChanged(VirtualChainChange {
            removed_chain_block_hashes: vec![],
            added_chain_block_hashes: vec![hash(4)],
        }))
        .await
        .unwrap();
        drop(bus);

        let result = handler.run().await;
        assert!(matches!(result, Err(HandlerError::StreamClosed)));
        assert_eq!(handler.handled(), 2);

        let mut tx = store.begin().await;
        let block = tx.block_by_hash(&hash(4)).unwrap();
        assert!(block.is_in_virtual_selected_parent_chain);
        assert_eq!(tx.block_by_hash(&hash(3)).unwrap().color, BlockColor::Blue);
    }

    #[tokio::test]
    async fn test_reconnected_triggers_resync() {
        let (engine, store, node) = test_engine(linear_node(3), ProcessingConfig::for_testing());
        let (bus, events) = event_channel(8);
        let handler = NodeEventHandler::new(Arc::new(engine), events);

        handler.handle(NodeEvent::Reconnected).await.unwrap();
        assert_eq!(store.begin().await.block_count().unwrap(), 3);

        node.add_block(make_block(3, &[2], 103));
        node.set_selected_chain((0..4).map(hash).collect());
        handler.handle(NodeEvent::Reconnected).await.unwrap();
        assert_eq!(store.begin().await.block_count().unwrap(), 4);
        drop(bus);
    }

    #[tokio::test]
    async fn test_first_failure_stops_the_handler() {
        let (engine, _store, node) = test_engine(linear_node(2), ProcessingConfig::for_testing());
        let (bus, events) = event_channel(8);
        let mut handler = NodeEventHandler::new(Arc::new(engine), events);

        node.set_should_fail(true);
        bus.publish(NodeEvent::Reconnected).await.unwrap();
        bus.publish(NodeEvent::Reconnected).await.unwrap();

        match handler.run().await {
            Err(HandlerError::Processing { topic, .. }) => {
                assert_eq!(topic, EventTopic::Connection)
            }
            other => panic!("expected processing failure, got {other:?}"),
        }
        assert_eq!(handler.handled(), 0);
    }
}
