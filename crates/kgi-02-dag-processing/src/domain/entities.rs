//! Results reported by the processing operations.

use kgi_01_dag_storage::BlockId;
use serde::{Deserialize, Serialize};

/// What happened to one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOutcome {
    pub id: BlockId,
    pub height: u64,
    /// A new row was written. `false` when the block was already stored.
    pub inserted: bool,
    /// Every direct parent resolved to a stored block.
    pub complete: bool,
    /// Selected parent and merge sets were reconciled against the node.
    pub metadata_reconciled: bool,
}

/// Counters of one applied chain change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainReconciliation {
    pub removed: usize,
    pub added: usize,
    pub recolored: usize,
    /// Blocks ingested on demand because the change referenced them first.
    pub backfilled: usize,
}

/// How a resync started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResyncMode {
    /// The store was wiped and rebuilt from the anchor.
    Full,
    /// Stored data was kept and only recent history re-verified.
    Incremental,
}

/// Summary of a completed resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncReport {
    pub mode: ResyncMode,
    pub cycles: u32,
    pub blocks_processed: usize,
    /// Blocks that were not stored at the start of the last cycle.
    pub final_gap: usize,
    /// Two consecutive cycles saw a small gap; `false` when the cycle limit
    /// stopped the resync.
    pub converged: bool,
}
