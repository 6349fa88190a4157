//! # Event Publisher
//!
//! Defines the publishing side of the node event channel.

use crate::events::NodeEvent;
use crate::subscriber::{EventStream, SubscriptionError};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Trait for publishing node events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event, waiting for channel space if the consumer is behind.
    ///
    /// Fails with [`SubscriptionError::Closed`] once the consumer is gone.
    async fn publish(&self, event: NodeEvent) -> Result<(), SubscriptionError>;

    /// Get the total number of events published.
    fn events_published(&self) -> u64;
}

/// Bounded, single-consumer event channel.
///
/// Cloning yields another publisher handle for the same channel.
#[derive(Clone)]
pub struct NodeEventBus {
    sender: mpsc::Sender<NodeEvent>,
    events_published: Arc<AtomicU64>,
    capacity: usize,
}

/// Create a channel with the given capacity, returning the publisher and its
/// single consumer.
#[must_use]
pub fn event_channel(capacity: usize) -> (NodeEventBus, EventStream) {
    let capacity = capacity.max(1);
    let (sender, receiver) = mpsc::channel(capacity);
    let bus = NodeEventBus {
        sender,
        events_published: Arc::new(AtomicU64::new(0)),
        capacity,
    };
    (bus, EventStream::new(receiver))
}

impl NodeEventBus {
    /// Create a channel with the default capacity.
    #[must_use]
    pub fn channel() -> (Self, EventStream) {
        event_channel(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the consumer has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl EventPublisher for NodeEventBus {
    async fn publish(&self, event: NodeEvent) -> Result<(), SubscriptionError> {
        let topic = event.topic();
        match self.sender.send(event).await {
            Ok(()) => {
                self.events_published.fetch_add(1, Ordering::Relaxed);
                debug!(topic = ?topic, "Event published");
                Ok(())
            }
            Err(_) => {
                warn!(topic = ?topic, "Event dropped (consumer closed)");
                Err(SubscriptionError::Closed)
            }
        }
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}
