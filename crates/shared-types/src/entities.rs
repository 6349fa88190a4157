//! # Core Domain Entities
//!
//! The block DAG as the node describes it. These types carry no storage
//! identity: surrogate ids and heights are assigned by the DAG store.
//!
//! ## Clusters
//!
//! - **Identity**: [`BlockHash`]
//! - **Blocks**: [`RpcBlock`], [`RpcBlockHeader`], [`RpcBlockVerboseData`]
//! - **Node status**: [`BlockDagInfo`], [`NodeInfo`], [`BlocksPage`]
//! - **Chain**: [`VirtualChainChange`]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::HashParseError;

// =============================================================================
// IDENTITY
// =============================================================================

/// Width of a block hash in bytes.
pub const HASH_SIZE: usize = 32;

/// Content-hash identity of a block, assigned by the upstream DAG.
///
/// Displays and serializes (in human-readable formats) as lowercase hex.
/// Binary formats store the raw 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockHash([u8; HASH_SIZE]);

impl BlockHash {
    /// Wrap raw hash bytes.
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a hash from a slice, rejecting any width other than 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashParseError> {
        let array: [u8; HASH_SIZE] =
            bytes
                .try_into()
                .map_err(|_| HashParseError::InvalidLength {
                    expected: HASH_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    /// Raw hash bytes.
    pub const fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Full lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

impl FromStr for BlockHash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| HashParseError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl From<[u8; HASH_SIZE]> for BlockHash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for BlockHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; HASH_SIZE]>::deserialize(deserializer).map(Self)
        }
    }
}

// =============================================================================
// BLOCKS
// =============================================================================

/// Block header fields the indexer consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlockHeader {
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Difficulty-adjustment score, monotonic along any chain.
    pub daa_score: u64,
    /// Direct (level 0) parents in node order.
    pub direct_parents: Vec<BlockHash>,
}

/// GHOSTDAG metadata, only present once the node has validated the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlockVerboseData {
    /// The body has not been received or validated yet.
    pub is_header_only: bool,
    /// Selected parent chosen by the node's coloring.
    pub selected_parent_hash: Option<BlockHash>,
    /// Merge set members colored red.
    pub merge_set_reds_hashes: Vec<BlockHash>,
    /// Merge set members colored blue.
    pub merge_set_blues_hashes: Vec<BlockHash>,
}

/// A block as returned by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    /// Identity of the block.
    pub hash: BlockHash,
    /// Header fields.
    pub header: RpcBlockHeader,
    /// Consensus metadata; `None` behaves as header-only.
    pub verbose_data: Option<RpcBlockVerboseData>,
}

impl RpcBlock {
    /// Direct parents of this block.
    pub fn direct_parents(&self) -> &[BlockHash] {
        &self.header.direct_parents
    }

    /// DAA score of this block.
    pub fn daa_score(&self) -> u64 {
        self.header.daa_score
    }

    /// Whether GHOSTDAG metadata is unavailable for this block.
    pub fn is_header_only(&self) -> bool {
        self.verbose_data
            .as_ref()
            .map_or(true, |verbose| verbose.is_header_only)
    }

    /// Selected parent, if the node reported one.
    pub fn selected_parent(&self) -> Option<BlockHash> {
        self.verbose_data
            .as_ref()
            .and_then(|verbose| verbose.selected_parent_hash)
    }

    /// Red merge set members (empty when unknown).
    pub fn merge_set_reds(&self) -> &[BlockHash] {
        self.verbose_data
            .as_ref()
            .map_or(&[], |verbose| verbose.merge_set_reds_hashes.as_slice())
    }

    /// Blue merge set members (empty when unknown).
    pub fn merge_set_blues(&self) -> &[BlockHash] {
        self.verbose_data
            .as_ref()
            .map_or(&[], |verbose| verbose.merge_set_blues_hashes.as_slice())
    }
}

// =============================================================================
// NODE STATUS
// =============================================================================

/// Snapshot of the node's DAG state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDagInfo {
    /// Network the node runs on (e.g. `kaspa-mainnet`).
    pub network: String,
    /// Oldest block the node retains full data for.
    pub pruning_point_hash: BlockHash,
    /// DAA score of the virtual block.
    pub virtual_daa_score: u64,
    /// Current DAG tips.
    pub tip_hashes: Vec<BlockHash>,
}

/// General node information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Node software version string.
    pub server_version: String,
    /// Whether the node considers itself synced with the network.
    pub is_synced: bool,
}

/// One page of the node's topologically ordered hash sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BlocksPage {
    /// Hashes ordered oldest to newest, starting at the requested low hash.
    pub block_hashes: Vec<BlockHash>,
    /// Full blocks, in the same order, when requested.
    pub blocks: Vec<RpcBlock>,
}

// =============================================================================
// CHAIN
// =============================================================================

/// Delta of the virtual selected-parent chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualChainChange {
    /// Blocks that left the chain, most recent first.
    pub removed_chain_block_hashes: Vec<BlockHash>,
    /// Blocks that joined the chain, oldest first.
    pub added_chain_block_hashes: Vec<BlockHash>,
}

impl VirtualChainChange {
    /// Whether the delta carries no change at all.
    pub fn is_empty(&self) -> bool {
        self.removed_chain_block_hashes.is_empty() && self.added_chain_block_hashes.is_empty()
    }
}
