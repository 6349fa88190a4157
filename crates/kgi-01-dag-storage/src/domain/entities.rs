//! # Core Domain Entities
//!
//! Rows of the mirrored DAG.
//!
//! ## Entities
//!
//! - `Block`: one DAG vertex with its derived layout and coloring metadata
//! - `Edge`: child → parent link, denormalized with both endpoints' layout
//! - `HeightGroup`: number of blocks at one height
//! - `AppConfig`: singleton describing who last wrote the store

use serde::{Deserialize, Serialize};
use shared_types::BlockHash;
use std::fmt;

/// Store-assigned surrogate id of a block. Ids start at 1 and are never reused.
pub type BlockId = u64;

/// Consensus coloring of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BlockColor {
    /// Not reconciled against the selected chain yet.
    #[default]
    Gray,
    /// Excluded by the consensus coloring.
    Red,
    /// Included by the consensus coloring.
    Blue,
}

impl BlockColor {
    /// Lowercase name, as shown to consumers of the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockColor::Gray => "gray",
            BlockColor::Red => "red",
            BlockColor::Blue => "blue",
        }
    }
}

impl fmt::Display for BlockColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Surrogate id, assigned once at insertion.
    pub id: BlockId,
    /// Identity hash from the node.
    pub block_hash: BlockHash,
    /// Creation time in milliseconds.
    pub timestamp: i64,
    /// Ids of the parents that were stored when this block was inserted.
    pub parent_ids: Vec<BlockId>,
    /// Longest-path distance from the anchor (anchor = 0).
    pub height: u64,
    /// Rank among blocks of the same height, assigned at insertion.
    pub height_group_index: u32,
    /// Selected parent, once resolved.
    pub selected_parent_id: Option<BlockId>,
    pub color: BlockColor,
    pub is_in_virtual_selected_parent_chain: bool,
    pub merge_set_red_ids: Vec<BlockId>,
    pub merge_set_blue_ids: Vec<BlockId>,
    /// DAA score, used as an approximate time axis.
    pub daa_score: u64,
}

/// Insertion payload for a block; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub block_hash: BlockHash,
    pub timestamp: i64,
    pub parent_ids: Vec<BlockId>,
    pub height: u64,
    pub height_group_index: u32,
    pub color: BlockColor,
    pub is_in_virtual_selected_parent_chain: bool,
    pub daa_score: u64,
}

impl NewBlock {
    /// Attach the assigned id, producing the stored row.
    pub fn into_block(self, id: BlockId) -> Block {
        Block {
            id,
            block_hash: self.block_hash,
            timestamp: self.timestamp,
            parent_ids: self.parent_ids,
            height: self.height,
            height_group_index: self.height_group_index,
            selected_parent_id: None,
            color: self.color,
            is_in_virtual_selected_parent_chain: self.is_in_virtual_selected_parent_chain,
            merge_set_red_ids: Vec::new(),
            merge_set_blue_ids: Vec::new(),
            daa_score: self.daa_score,
        }
    }
}

/// Child → parent edge. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from_block_id: BlockId,
    pub to_block_id: BlockId,
    pub from_height: u64,
    pub to_height: u64,
    pub from_height_group_index: u32,
    pub to_height_group_index: u32,
}

/// Number of blocks stored at one height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightGroup {
    pub height: u64,
    pub size: u32,
}

/// Singleton row, upserted on every startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Version string reported by the node.
    pub kaspad_version: String,
    /// Version of the processing binary.
    pub processing_version: String,
    /// Network the node runs on.
    pub network: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_block_into_block_starts_unreconciled() {
        let new = NewBlock {
            block_hash: BlockHash::from_bytes([1; 32]),
            timestamp: 10,
            parent_ids: vec![3, 4],
            height: 2,
            height_group_index: 0,
            color: BlockColor::Gray,
            is_in_virtual_selected_parent_chain: false,
            daa_score: 99,
        };
        let block = new.into_block(7);
        assert_eq!(block.id, 7);
        assert_eq!(block.parent_ids, vec![3, 4]);
        assert!(block.selected_parent_id.is_none());
        assert!(block.merge_set_blue_ids.is_empty());
        assert_eq!(block.color, BlockColor::Gray);
    }

    #[test]
    fn test_color_names() {
        assert_eq!(BlockColor::default(), BlockColor::Gray);
        assert_eq!(BlockColor::Blue.to_string(), "blue");
        assert_eq!(BlockColor::Red.as_str(), "red");
    }
}
