//! # Processing Runtime
//!
//! Startup and steady state of the indexer.
//!
//! ## Startup Sequence
//!
//! 1. Optionally wait until the node reports itself synced
//! 2. Record node version, processing version and network in `app_config`
//! 3. Resync the store up to the node's selected tip
//! 4. Handle node events until failure or shutdown

use std::sync::Arc;
use std::time::Duration;

use kgi_01_dag_storage::{AppConfig, KeyValueStore, StorageError};
use kgi_02_dag_processing::{
    NodeClient, NodeError, ProcessingApi, ProcessingError, ResyncEngine,
};
use kgi_telemetry::log_event;
use shared_bus::EventStream;
use shared_types::NodeInfo;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::handlers::{HandlerError, NodeEventHandler};

/// Interval between sync-state polls while waiting for the node.
pub const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(5);

const SUBSYSTEM: &str = "runtime";

/// Failures that stop the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("node request {operation} failed: {source}")]
    Node {
        operation: &'static str,
        #[source]
        source: NodeError,
    },

    #[error("failed to record app config: {0}")]
    AppConfig(#[from] StorageError),

    #[error("resync failed: {0}")]
    Resync(#[from] ProcessingError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("runtime already started")]
    AlreadyStarted,
}

/// Startup options.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Network name recorded in `app_config`.
    pub network: String,
    pub wait_for_sync: bool,
    pub sync_poll_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            network: "kaspa-mainnet".to_string(),
            wait_for_sync: false,
            sync_poll_interval: SYNC_POLL_INTERVAL,
        }
    }
}

/// Requests a graceful stop of a running [`ProcessingRuntime`].
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        if let Err(e) = self.0.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
    }
}

/// The indexer: one engine fed by one event stream.
pub struct ProcessingRuntime<S: KeyValueStore, N: NodeClient> {
    engine: Arc<ResyncEngine<S, N>>,
    events: Option<EventStream>,
    options: RuntimeOptions,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S, N> ProcessingRuntime<S, N>
where
    S: KeyValueStore + 'static,
    N: NodeClient + 'static,
{
    pub fn new(engine: ResyncEngine<S, N>, events: EventStream, options: RuntimeOptions) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            engine: Arc::new(engine),
            events: Some(events),
            options,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    pub fn engine(&self) -> &Arc<ResyncEngine<S, N>> {
        &self.engine
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Run until shutdown is requested (`Ok`) or processing fails (`Err`).
    ///
    /// A shutdown cancels whatever is in flight; an open transaction is
    /// rolled back.
    pub async fn run(&mut self) -> Result<(), RuntimeError> {
        let mut shutdown = self.shutdown_rx.clone();
        if *shutdown.borrow() {
            return Ok(());
        }
        tokio::select! {
            result = self.start_and_listen() => result,
            _ = shutdown.changed() => {
                log_event!(info, SUBSYSTEM, "Shutdown requested");
                Ok(())
            }
        }
    }

    async fn start_and_listen(&mut self) -> Result<(), RuntimeError> {
        let events = self.events.take().ok_or(RuntimeError::AlreadyStarted)?;

        let node_info = self.await_node().await?;
        self.record_app_config(&node_info).await?;

        let report = self.engine.resync_database().await?;
        log_event!(
            info,
            SUBSYSTEM,
            "Initial resync finished",
            mode = ?report.mode,
            cycles = report.cycles,
            blocks_processed = report.blocks_processed,
            converged = report.converged
        );

        let mut handler = NodeEventHandler::new(Arc::clone(&self.engine), events);
        handler.run().await?;
        Ok(())
    }

    /// Node info, after the node reports itself synced if so configured.
    async fn await_node(&self) -> Result<NodeInfo, RuntimeError> {
        loop {
            let info = self
                .engine
                .node()
                .get_info()
                .await
                .map_err(|source| RuntimeError::Node {
                    operation: "get_info",
                    source,
                })?;
            if info.is_synced || !self.options.wait_for_sync {
                return Ok(info);
            }
            info!(
                server_version = %info.server_version,
                "Waiting for the node to finish syncing"
            );
            tokio::time::sleep(self.options.sync_poll_interval).await;
        }
    }

    async fn record_app_config(&self, node_info: &NodeInfo) -> Result<(), RuntimeError> {
        let config = AppConfig {
            kaspad_version: node_info.server_version.clone(),
            processing_version: crate::VERSION.to_string(),
            network: self.options.network.clone(),
        };
        self.engine
            .store()
            .run_in_transaction(|tx| {
                if let Some(previous) = tx.app_config()? {
                    if previous.kaspad_version != config.kaspad_version {
                        warn!(
                            previous = %previous.kaspad_version,
                            current = %config.kaspad_version,
                            "Node version changed since the store was last written"
                        );
                    }
                    if previous.network != config.network {
                        warn!(
                            previous = %previous.network,
                            current = %config.network,
                            "Network changed since the store was last written"
                        );
                    }
                }
                tx.upsert_app_config(&config)
            })
            .await?;
        log_event!(
            info,
            SUBSYSTEM,
            "Recorded app config",
            kaspad_version = %config.kaspad_version,
            network = %config.network
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgi_02_dag_processing::test_utils::{hash, linear_node, make_block, test_engine};
    use kgi_02_dag_processing::ProcessingConfig;
    use shared_bus::{event_channel, EventPublisher, NodeEvent};

    fn options() -> RuntimeOptions {
        RuntimeOptions {
            network: "kaspa-simnet".to_string(),
            wait_for_sync: true,
            sync_poll_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_runs_until_stream_ends() {
        let (engine, store, node) = test_engine(linear_node(3), ProcessingConfig::for_testing());
        node.set_server_version("0.14.1");
        let (bus, events) = event_channel(8);
        let mut runtime = ProcessingRuntime::new(engine, events, options());

        node.add_block(make_block(3, &[2], 103));
        bus.publish(NodeEvent::BlockAdded(make_block(3, &[2], 103)))
            .await
            .unwrap();
        drop(bus);

        let result = runtime.run().await;
        assert!(matches!(
            result,
            Err(RuntimeError::Handler(HandlerError::StreamClosed))
        ));

        let mut tx = store.begin().await;
        assert!(tx.does_block_exist(&hash(3)).unwrap());
        let config = tx.app_config().unwrap().unwrap();
        assert_eq!(config.kaspad_version, "0.14.1");
        assert_eq!(config.network, "kaspa-simnet");
        assert_eq!(config.processing_version, crate::VERSION);
    }

    #[tokio::test]
    async fn test_waits_for_sync_then_shuts_down() {
        let (engine, store, node) = test_engine(linear_node(3), ProcessingConfig::for_testing());
        node.set_synced(false);
        let (_bus, events) = event_channel(8);
        let mut runtime = ProcessingRuntime::new(engine, events, options());
        let shutdown = runtime.shutdown_handle();

        let waiter = tokio::spawn(async move {
            let result = runtime.run().await;
            (runtime, result)
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.begin().await.block_count().unwrap(), 0);

        node.set_synced(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.begin().await.block_count().unwrap(), 3);

        shutdown.trigger();
        let (mut runtime, result) = waiter.await.unwrap();
        assert!(result.is_ok());
        // Shutdown was already requested, so a second run returns at once.
        assert!(runtime.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_node_failure_is_reported() {
        let (engine, _store, node) = test_engine(linear_node(2), ProcessingConfig::for_testing());
        node.set_should_fail(true);
        let (_bus, events) = event_channel(8);
        let mut runtime = ProcessingRuntime::new(engine, events, options());

        assert!(matches!(
            runtime.run().await,
            Err(RuntimeError::Node {
                operation: "get_info",
                ..
            })
        ));
    }
}
