//! # Node Events
//!
//! Notifications the node pushes to the indexer.

use serde::{Deserialize, Serialize};
use shared_types::{BlockHash, RpcBlock, VirtualChainChange};

/// A notification from the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeEvent {
    /// The node accepted a new block into its DAG.
    BlockAdded(RpcBlock),

    /// The virtual selected-parent chain changed.
    VirtualChainChanged(VirtualChainChange),

    /// The connection to the node was re-established after a loss.
    ///
    /// Anything that happened while disconnected was missed, so the consumer
    /// must run a full resync.
    Reconnected,
}

/// Coarse event category, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Block-added notifications.
    Blocks,
    /// Chain-changed notifications.
    Chain,
    /// Connection lifecycle.
    Connection,
}

impl NodeEvent {
    /// Topic of this event.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::BlockAdded(_) => EventTopic::Blocks,
            Self::VirtualChainChanged(_) => EventTopic::Chain,
            Self::Reconnected => EventTopic::Connection,
        }
    }

    /// Hash of the block the event is about, if any.
    #[must_use]
    pub fn block_hash(&self) -> Option<BlockHash> {
        match self {
            Self::BlockAdded(block) => Some(block.hash),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::RpcBlockHeader;

    #[test]
    fn test_event_topics() {
        let block = RpcBlock {
            hash: BlockHash::from_bytes([7; 32]),
            header: RpcBlockHeader::default(),
            verbose_data: None,
        };
        let added = NodeEvent::BlockAdded(block);
        assert_eq!(added.topic(), EventTopic::Blocks);
        assert_eq!(added.block_hash(), Some(BlockHash::from_bytes([7; 32])));

        let changed = NodeEvent::VirtualChainChanged(VirtualChainChange::default());
        assert_eq!(changed.topic(), EventTopic::Chain);
        assert_eq!(changed.block_hash(), None);

        assert_eq!(NodeEvent::Reconnected.topic(), EventTopic::Connection);
    }
}
