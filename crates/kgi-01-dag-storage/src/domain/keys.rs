//! # Key Layout
//!
//! Every table lives under its own two-byte prefix. Integers are big-endian so
//! that prefix scans return rows in numeric order.

use shared_types::BlockHash;

use super::entities::BlockId;
use super::errors::StorageError;

/// Table prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPrefix {
    /// `b/{id}` -> Block
    Block,
    /// `h/{hash}` -> id
    BlockHash,
    /// `e/{from}{to}` -> Edge
    Edge,
    /// `g/{height}` -> size
    HeightGroup,
    /// `v/{height}{id}` -> empty, one row per selected-chain member
    ChainMember,
    /// `r/{to}{from}` -> empty, reverse edge index
    ChildEdge,
    /// `m/{height}{index}` -> id, occupant of a height-group slot
    HeightGroupMember,
    /// `w/{parent hash}{child id}` -> empty, stored child waiting for a parent
    WaitingChild,
    /// `s/{name}` -> next value
    Sequence,
    /// `a/{name}` -> singleton rows
    AppConfig,
}

/// Tables wiped by a full reset. Sequences and app config survive.
pub const DAG_TABLES: [KeyPrefix; 8] = [
    KeyPrefix::Block,
    KeyPrefix::BlockHash,
    KeyPrefix::Edge,
    KeyPrefix::HeightGroup,
    KeyPrefix::ChainMember,
    KeyPrefix::ChildEdge,
    KeyPrefix::HeightGroupMember,
    KeyPrefix::WaitingChild,
];

const NEXT_BLOCK_ID: &[u8] = b"next_block_id";
const APP_CONFIG: &[u8] = b"app_config";

impl KeyPrefix {
    /// Get the byte prefix for this key type.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            KeyPrefix::Block => b"b/",
            KeyPrefix::BlockHash => b"h/",
            KeyPrefix::Edge => b"e/",
            KeyPrefix::HeightGroup => b"g/",
            KeyPrefix::ChainMember => b"v/",
            KeyPrefix::ChildEdge => b"r/",
            KeyPrefix::HeightGroupMember => b"m/",
            KeyPrefix::WaitingChild => b"w/",
            KeyPrefix::Sequence => b"s/",
            KeyPrefix::AppConfig => b"a/",
        }
    }

    /// Build a full key with the given suffix.
    pub fn key(&self, suffix: &[u8]) -> Vec<u8> {
        let mut key = self.as_bytes().to_vec();
        key.extend_from_slice(suffix);
        key
    }

    pub fn block_key(id: BlockId) -> Vec<u8> {
        KeyPrefix::Block.key(&id.to_be_bytes())
    }

    pub fn hash_key(hash: &BlockHash) -> Vec<u8> {
        KeyPrefix::BlockHash.key(hash.as_bytes())
    }

    pub fn edge_key(from: BlockId, to: BlockId) -> Vec<u8> {
        let mut key = Self::edges_from_prefix(from);
        key.extend_from_slice(&to.to_be_bytes());
        key
    }

    /// Prefix of all edges leaving `from`.
    pub fn edges_from_prefix(from: BlockId) -> Vec<u8> {
        KeyPrefix::Edge.key(&from.to_be_bytes())
    }

    pub fn height_group_key(height: u64) -> Vec<u8> {
        KeyPrefix::HeightGroup.key(&height.to_be_bytes())
    }

    pub fn chain_member_key(height: u64, id: BlockId) -> Vec<u8> {
        let mut key = KeyPrefix::ChainMember.key(&height.to_be_bytes());
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    /// Prefix of all reverse-index rows pointing at `to`.
    pub fn child_edges_prefix(to: BlockId) -> Vec<u8> {
        KeyPrefix::ChildEdge.key(&to.to_be_bytes())
    }

    pub fn child_edge_key(to: BlockId, from: BlockId) -> Vec<u8> {
        let mut key = Self::child_edges_prefix(to);
        key.extend_from_slice(&from.to_be_bytes());
        key
    }

    pub fn height_group_member_key(height: u64, index: u32) -> Vec<u8> {
        let mut key = KeyPrefix::HeightGroupMember.key(&height.to_be_bytes());
        key.extend_from_slice(&index.to_be_bytes());
        key
    }

    /// Prefix of all children waiting for `parent`.
    pub fn waiting_children_prefix(parent: &BlockHash) -> Vec<u8> {
        KeyPrefix::WaitingChild.key(parent.as_bytes())
    }

    pub fn waiting_child_key(parent: &BlockHash, child: BlockId) -> Vec<u8> {
        let mut key = Self::waiting_children_prefix(parent);
        key.extend_from_slice(&child.to_be_bytes());
        key
    }

    pub fn next_block_id_key() -> Vec<u8> {
        KeyPrefix::Sequence.key(NEXT_BLOCK_ID)
    }

    pub fn app_config_key() -> Vec<u8> {
        KeyPrefix::AppConfig.key(APP_CONFIG)
    }
}

/// Decode a big-endian `u64` value or key segment.
pub fn decode_u64(bytes: &[u8]) -> Result<u64, StorageError> {
    let array: [u8; 8] = bytes.try_into().map_err(|_| StorageError::Corruption {
        message: format!("expected 8-byte integer, got {} bytes", bytes.len()),
    })?;
    Ok(u64::from_be_bytes(array))
}

/// Decode a big-endian `u32` value.
pub fn decode_u32(bytes: &[u8]) -> Result<u32, StorageError> {
    let array: [u8; 4] = bytes.try_into().map_err(|_| StorageError::Corruption {
        message: format!("expected 4-byte integer, got {} bytes", bytes.len()),
    })?;
    Ok(u32::from_be_bytes(array))
}

/// The trailing big-endian id of a composite key.
pub fn decode_trailing_id(key: &[u8]) -> Result<BlockId, StorageError> {
    match key.len().checked_sub(8) {
        Some(start) => decode_u64(&key[start..]),
        None => Err(StorageError::Corruption {
            message: format!("key of {} bytes has no trailing id", key.len()),
        }),
    }
}

/// Split a chain-member key back into `(height, id)`.
pub fn decode_chain_member_key(key: &[u8]) -> Result<(u64, BlockId), StorageError> {
    let prefix_len = KeyPrefix::ChainMember.as_bytes().len();
    if key.len() != prefix_len + 16 || !key.starts_with(KeyPrefix::ChainMember.as_bytes()) {
        return Err(StorageError::Corruption {
            message: format!("malformed chain-member key of {} bytes", key.len()),
        });
    }
    let height = decode_u64(&key[prefix_len..prefix_len + 8])?;
    let id = decode_u64(&key[prefix_len + 8..])?;
    Ok((height, id))
}
