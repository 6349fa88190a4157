//! # kgi-processing
//!
//! Mirrors a Kaspa node's block DAG into RocksDB and keeps it current.
//!
//! ```text
//! kgi-processing --connection-string ./data/kgi --rpcserver ws://127.0.0.1:18110 \
//!     [--network testnet-11] [--resync] [--clear-db] [--wait-for-sync]
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kgi_01_dag_storage::{DagStore, StoreConfig};
use kgi_02_dag_processing::ResyncEngine;
use kgi_telemetry::init_telemetry;
use shared_bus::{event_channel, DEFAULT_CHANNEL_CAPACITY};
use tracing::{error, info};

use processing_runtime::adapters::{RocksDbConfig, RocksDbStore, WrpcNodeClient};
use processing_runtime::{Args, ProcessingRuntime, RuntimeConfig, RuntimeOptions, VERSION};

#[tokio::main]
async fn main() -> ExitCode {
    let config = RuntimeConfig::from_args(Args::parse());
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    let _telemetry = match init_telemetry(config.telemetry.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RuntimeConfig) -> Result<()> {
    info!("Kaspa Graph Inspector processing tier, version {}", VERSION);
    info!(network = %config.network, data_dir = %config.data_dir.display(), "Starting");

    let kv = RocksDbStore::open(RocksDbConfig {
        path: config.data_dir.clone(),
        ..RocksDbConfig::default()
    })
    .with_context(|| format!("Could not open database at {}", config.data_dir.display()))?;
    let store = Arc::new(DagStore::new(
        kv,
        StoreConfig {
            cache_capacity: config.processing.cache_capacity,
        },
    ));

    let (bus, events) = event_channel(DEFAULT_CHANNEL_CAPACITY);
    let node = WrpcNodeClient::connect(config.wrpc.clone(), bus)
        .await
        .with_context(|| format!("Could not connect to node at {}", config.wrpc.url))?;
    let node = Arc::new(node);

    let engine = ResyncEngine::new(store, Arc::clone(&node), config.processing.clone());
    let options = RuntimeOptions {
        network: config.network.to_string(),
        wait_for_sync: config.wait_for_sync,
        ..RuntimeOptions::default()
    };
    let mut runtime = ProcessingRuntime::new(engine, events, options);

    let shutdown = runtime.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C");
            shutdown.trigger();
        }
    });

    let result = runtime.run().await.context("Processing stopped");
    node.close();
    result
}
