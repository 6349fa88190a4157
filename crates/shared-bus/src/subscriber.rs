//! # Event Subscriber
//!
//! The consuming side of the node event channel.

use crate::events::NodeEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The other side of the channel was dropped.
    #[error("Event channel closed")]
    Closed,
}

/// The single consumer of node events.
pub struct EventStream {
    receiver: mpsc::Receiver<NodeEvent>,
    received: u64,
}

impl EventStream {
    pub(crate) fn new(receiver: mpsc::Receiver<NodeEvent>) -> Self {
        Self {
            receiver,
            received: 0,
        }
    }

    /// Receive the next event.
    ///
    /// # Returns
    ///
    /// - `Some(event)` - The next event in publish order
    /// - `None` - Every publisher was dropped and the buffer is drained
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        let event = self.receiver.recv().await;
        match &event {
            Some(e) => {
                self.received += 1;
                debug!(topic = ?e.topic(), received = self.received, "Event received");
            }
            None => debug!("Event channel closed"),
        }
        event
    }

    /// Try to receive the next event without blocking.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(event))` - An event was available
    /// - `Ok(None)` - No event available (would block)
    /// - `Err(SubscriptionError::Closed)` - Every publisher was dropped
    pub fn try_recv(&mut self) -> Result<Option<NodeEvent>, SubscriptionError> {
        match self.receiver.try_recv() {
            Ok(event) => {
                self.received += 1;
                Ok(Some(event))
            }
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SubscriptionError::Closed),
        }
    }

    /// Number of events received so far.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Stop accepting new events; buffered events can still be drained.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use crate::{event_channel, EventPublisher, NodeEvent, SubscriptionError};

    #[tokio::test]
    async fn test_try_recv_empty_then_value() {
        let (bus, mut stream) = event_channel(2);
        assert_eq!(stream.try_recv().unwrap().map(|e| e.topic()), None);

        bus.publish(NodeEvent::Reconnected).await.unwrap();
        assert!(matches!(stream.try_recv(), Ok(Some(NodeEvent::Reconnected))));
        assert_eq!(stream.received(), 1);
    }

    #[tokio::test]
    async fn test_recv_none_after_publishers_dropped() {
        let (bus, mut stream) = event_channel(2);
        bus.publish(NodeEvent::Reconnected).await.unwrap();
        drop(bus);

        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_none());
        assert!(matches!(stream.try_recv(), Err(SubscriptionError::Closed)));
    }

    #[tokio::test]
    async fn test_close_rejects_new_events() {
        let (bus, mut stream) = event_channel(2);
        stream.close();
        assert!(bus.publish(NodeEvent::Reconnected).await.is_err());
    }
}
