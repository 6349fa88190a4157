//! # Resync Engine
//!
//! Implements [`ProcessingApi`] over a [`DagStore`] and a [`NodeClient`].
//!
//! Every public operation takes the engine lock first, so a live
//! notification waits for a resync in progress instead of interleaving with
//! it. The `*_locked` variants are what operations use internally once the
//! lock is held.

use std::sync::Arc;

use async_trait::async_trait;
use kgi_01_dag_storage::{DagStore, KeyValueStore};
use shared_types::{BlockHash, RpcBlock, VirtualChainChange};
use tokio::sync::Mutex;
use tracing::debug;

use crate::algorithms::DependencyBatch;
use crate::config::ProcessingConfig;
use crate::domain::{BlockOutcome, ChainReconciliation, ProcessingError, ResyncReport};
use crate::ports::{NodeClient, ProcessingApi};

use super::ingest::ingest_block;

/// The node's pruning point as of the last resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Anchor {
    pub hash: BlockHash,
    pub daa_score: u64,
}

/// State guarded by the engine lock.
#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub anchor: Option<Anchor>,
    /// Set by the first resync; `clear_db` is only honoured before that.
    pub first_resync_done: bool,
}

/// Drives the DAG store from node queries and notifications.
pub struct ResyncEngine<S: KeyValueStore, N: NodeClient> {
    pub(crate) store: Arc<DagStore<S>>,
    pub(crate) node: Arc<N>,
    pub(crate) config: ProcessingConfig,
    state: Mutex<EngineState>,
}

impl<S: KeyValueStore, N: NodeClient> ResyncEngine<S, N> {
    pub fn new(store: Arc<DagStore<S>>, node: Arc<N>, config: ProcessingConfig) -> Self {
        Self {
            store,
            node,
            config,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn store(&self) -> &Arc<DagStore<S>> {
        &self.store
    }

    pub fn node(&self) -> &Arc<N> {
        &self.node
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Hash of the anchor chosen by the last resync, if any ran.
    pub async fn anchor_hash(&self) -> Option<BlockHash> {
        self.state.lock().await.anchor.map(|anchor| anchor.hash)
    }

    pub(crate) async fn process_block_locked(
        &self,
        state: &EngineState,
        block: &RpcBlock,
    ) -> Result<BlockOutcome, ProcessingError> {
        let anchor = state.anchor.map(|anchor| anchor.hash);
        self.store
            .run_in_transaction(|tx| ingest_block(tx, block, anchor.as_ref()))
            .await
    }

    pub(crate) async fn process_block_and_dependencies_locked(
        &self,
        state: &EngineState,
        block: RpcBlock,
    ) -> Result<Vec<BlockOutcome>, ProcessingError> {
        let seed = block.hash;
        let mut batch = DependencyBatch::new(
            state.anchor.map(|anchor| anchor.daa_score),
            self.config.batch_capacity,
        );
        {
            let tx = self.store.begin().await;
            batch
                .collect_block_and_dependencies(&tx, self.node.as_ref(), block)
                .await?;
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        while let Some(next) = batch.pop() {
            outcomes.push(self.process_block_locked(state, &next).await?);
        }
        if outcomes.len() > 1 {
            debug!(block_hash = %seed, processed = outcomes.len(), "Processed block with dependencies");
        }
        Ok(outcomes)
    }
}

#[async_trait]
impl<S, N> ProcessingApi for ResyncEngine<S, N>
where
    S: KeyValueStore + 'static,
    N: NodeClient + 'static,
{
    async fn resync_database(&self) -> Result<ResyncReport, ProcessingError> {
        let mut state = self.state.lock().await;
        self.resync_database_locked(&mut state).await
    }

    async fn process_block(&self, block: &RpcBlock) -> Result<BlockOutcome, ProcessingError> {
        let state = self.state.lock().await;
        self.process_block_locked(&state, block).await
    }

    async fn process_block_and_dependencies(
        &self,
        block: RpcBlock,
    ) -> Result<Vec<BlockOutcome>, ProcessingError> {
        let state = self.state.lock().await;
        self.process_block_and_dependencies_locked(&state, block).await
    }

    async fn process_virtual_change(
        &self,
        change: &VirtualChainChange,
    ) -> Result<ChainReconciliation, ProcessingError> {
        let state = self.state.lock().await;
        self.process_virtual_change_locked(&state, change).await
    }

    async fn resync_virtual_selected_parent_chain(
        &self,
    ) -> Result<ChainReconciliation, ProcessingError> {
        let state = self.state.lock().await;
        self.resync_virtual_selected_parent_chain_locked(&state).await
    }
}
