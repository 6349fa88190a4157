//! Wire types of the node's JSON wRPC protocol and their mapping onto the
//! shared node-facing types.

use kgi_02_dag_processing::NodeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_types::{
    BlockDagInfo, BlockHash, BlocksPage, NodeInfo, RpcBlock, RpcBlockHeader, RpcBlockVerboseData,
    VirtualChainChange,
};

/// Method names.
pub mod methods {
    pub const GET_BLOCK_DAG_INFO: &str = "getBlockDagInfo";
    pub const GET_BLOCK: &str = "getBlock";
    pub const GET_BLOCKS: &str = "getBlocks";
    pub const GET_SINK: &str = "getSink";
    pub const GET_VIRTUAL_CHAIN_FROM_BLOCK: &str = "getVirtualChainFromBlock";
    pub const GET_INFO: &str = "getInfo";
    pub const SUBSCRIBE_BLOCK_ADDED: &str = "subscribeBlockAdded";
    pub const SUBSCRIBE_VIRTUAL_CHAIN_CHANGED: &str = "subscribeVirtualChainChanged";
    pub const BLOCK_ADDED_NOTIFICATION: &str = "blockAddedNotification";
    pub const VIRTUAL_CHAIN_CHANGED_NOTIFICATION: &str = "virtualChainChangedNotification";
}

// =============================================================================
// FRAMING
// =============================================================================

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a, P> {
    pub id: u64,
    pub method: &'a str,
    pub params: P,
}

/// Any inbound frame: a response when `id` is set, otherwise a notification.
#[derive(Debug, Deserialize)]
pub struct RpcMessage {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub message: String,
}

/// Map an error reported by the node. Lookups of a specific block that the
/// node does not have become [`NodeError::NotFound`].
pub fn map_rpc_error(message: String, hash: Option<&BlockHash>) -> NodeError {
    let lowered = message.to_lowercase();
    match hash {
        Some(hash) if lowered.contains("not found") || lowered.contains("cannot find") => {
            NodeError::NotFound(*hash)
        }
        _ => NodeError::Rpc(message),
    }
}

// =============================================================================
// REQUESTS
// =============================================================================

#[derive(Debug, Serialize, Default)]
pub struct EmptyParams {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlockRequest {
    pub hash: BlockHash,
    pub include_transactions: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlocksRequest {
    pub low_hash: BlockHash,
    pub include_blocks: bool,
    pub include_transactions: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVirtualChainFromBlockRequest {
    pub start_hash: BlockHash,
    pub include_accepted_transaction_ids: bool,
}

// =============================================================================
// BLOCKS
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBlockHeader {
    pub hash: BlockHash,
    pub timestamp: i64,
    pub daa_score: u64,
    /// Parents per DAG level; level 0 holds the direct parents.
    #[serde(default)]
    pub parents_by_level: Vec<Vec<BlockHash>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBlockVerboseData {
    #[serde(default)]
    pub is_header_only: bool,
    #[serde(default)]
    pub selected_parent_hash: Option<BlockHash>,
    #[serde(default)]
    pub merge_set_blues_hashes: Vec<BlockHash>,
    #[serde(default)]
    pub merge_set_reds_hashes: Vec<BlockHash>,
    #[serde(default)]
    pub is_chain_block: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBlock {
    pub header: WireBlockHeader,
    #[serde(default)]
    pub verbose_data: Option<WireBlockVerboseData>,
}

impl From<WireBlock> for RpcBlock {
    fn from(wire: WireBlock) -> Self {
        let WireBlockHeader {
            hash,
            timestamp,
            daa_score,
            parents_by_level,
        } = wire.header;
        let direct_parents = parents_by_level.into_iter().next().unwrap_or_default();
        let verbose_data = wire.verbose_data.map(|verbose| RpcBlockVerboseData {
            is_header_only: verbose.is_header_only,
            // The node reports the zero hash for "no selected parent".
            selected_parent_hash: verbose
                .selected_parent_hash
                .filter(|h| *h != BlockHash::default()),
            merge_set_reds_hashes: verbose.merge_set_reds_hashes,
            merge_set_blues_hashes: verbose.merge_set_blues_hashes,
        });
        RpcBlock {
            hash,
            header: RpcBlockHeader {
                timestamp,
                daa_score,
                direct_parents,
            },
            verbose_data,
        }
    }
}

// =============================================================================
// RESPONSES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlockDagInfoResponse {
    #[serde(alias = "networkName")]
    pub network: String,
    pub pruning_point_hash: BlockHash,
    pub virtual_daa_score: u64,
    #[serde(default)]
    pub tip_hashes: Vec<BlockHash>,
}

impl From<GetBlockDagInfoResponse> for BlockDagInfo {
    fn from(response: GetBlockDagInfoResponse) -> Self {
        BlockDagInfo {
            network: response.network,
            pruning_point_hash: response.pruning_point_hash,
            virtual_daa_score: response.virtual_daa_score,
            tip_hashes: response.tip_hashes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GetBlockResponse {
    pub block: WireBlock,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlocksResponse {
    #[serde(default)]
    pub block_hashes: Vec<BlockHash>,
    #[serde(default)]
    pub blocks: Vec<WireBlock>,
}

impl From<GetBlocksResponse> for BlocksPage {
    fn from(response: GetBlocksResponse) -> Self {
        BlocksPage {
            block_hashes: response.block_hashes,
            blocks: response.blocks.into_iter().map(RpcBlock::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GetSinkResponse {
    pub sink: BlockHash,
}

/// Also the payload of `virtualChainChangedNotification`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualChainResponse {
    #[serde(default)]
    pub removed_chain_block_hashes: Vec<BlockHash>,
    #[serde(default)]
    pub added_chain_block_hashes: Vec<BlockHash>,
}

impl From<VirtualChainResponse> for VirtualChainChange {
    fn from(response: VirtualChainResponse) -> Self {
        VirtualChainChange {
            removed_chain_block_hashes: response.removed_chain_block_hashes,
            added_chain_block_hashes: response.added_chain_block_hashes,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInfoResponse {
    pub server_version: String,
    pub is_synced: bool,
}

impl From<GetInfoResponse> for NodeInfo {
    fn from(response: GetInfoResponse) -> Self {
        NodeInfo {
            server_version: response.server_version,
            is_synced: response.is_synced,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BlockAddedNotification {
    pub block: WireBlock,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn h(n: u8) -> BlockHash {
        BlockHash::from_bytes([n; 32])
    }

    #[test]
    fn test_wire_block_maps_level_zero_parents() {
        let wire: WireBlock = serde_json::from_value(json!({
            "header": {
                "hash": h(3).to_hex(),
                "timestamp": 1700,
                "daaScore": 42,
                "parentsByLevel": [[h(1).to_hex(), h(2).to_hex()], [h(9).to_hex()]]
            },
            "verboseData": {
                "isHeaderOnly": false,
                "selectedParentHash": h(1).to_hex(),
                "mergeSetBluesHashes": [h(1).to_hex()],
                "mergeSetRedsHashes": [h(2).to_hex()],
                "isChainBlock": true
            }
        }))
        .unwrap();

        let block = RpcBlock::from(wire);
        assert_eq!(block.hash, h(3));
        assert_eq!(block.daa_score(), 42);
        assert_eq!(block.direct_parents(), &[h(1), h(2)]);
        assert_eq!(block.selected_parent(), Some(h(1)));
        assert_eq!(block.merge_set_reds(), &[h(2)]);
        assert!(!block.is_header_only());
    }

    #[test]
    fn test_zero_selected_parent_is_none_and_missing_verbose_is_header_only() {
        let wire: WireBlock = serde_json::from_value(json!({
            "header": {"hash": h(3).to_hex(), "timestamp": 0, "daaScore": 0},
            "verboseData": {"selectedParentHash": BlockHash::default().to_hex()}
        }))
        .unwrap();
        assert!(RpcBlock::from(wire).selected_parent().is_none());

        let bare: WireBlock = serde_json::from_value(json!({
            "header": {"hash": h(4).to_hex(), "timestamp": 0, "daaScore": 0}
        }))
        .unwrap();
        let block = RpcBlock::from(bare);
        assert!(block.is_header_only());
        assert!(block.direct_parents().is_empty());
    }

    #[test]
    fn test_request_framing() {
        let request = RpcRequest {
            id: 7,
            method: methods::GET_BLOCKS,
            params: GetBlocksRequest {
                low_hash: h(1),
                include_blocks: false,
                include_transactions: false,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "getBlocks");
        assert_eq!(value["params"]["lowHash"], h(1).to_hex());
        assert_eq!(value["params"]["includeBlocks"], false);
    }

    #[test]
    fn test_not_found_mapping_needs_a_hash() {
        assert_eq!(
            map_rpc_error("Block 0101 not found".to_string(), Some(&h(1))),
            NodeError::NotFound(h(1))
        );
        assert_eq!(
            map_rpc_error("block not found".to_string(), None),
            NodeError::Rpc("block not found".to_string())
        );
        assert_eq!(
            map_rpc_error("internal".to_string(), Some(&h(1))),
            NodeError::Rpc("internal".to_string())
        );
    }

    #[test]
    fn test_dag_info_accepts_network_name_alias() {
        let response: GetBlockDagInfoResponse = serde_json::from_value(json!({
            "networkName": "kaspa-testnet-11",
            "pruningPointHash": h(5).to_hex(),
            "virtualDaaScore": 900
        }))
        .unwrap();
        let info = BlockDagInfo::from(response);
        assert_eq!(info.network, "kaspa-testnet-11");
        assert_eq!(info.pruning_point_hash, h(5));
        assert!(info.tip_hashes.is_empty());
    }
}
