//! # Shared Bus - Node Event Channel
//!
//! Carries node notifications from the node adapter to the processing loop
//! as typed messages on a bounded channel.
//!
//! ```text
//! ┌──────────────┐   publish()    ┌──────────────┐   recv()   ┌─────────────────┐
//! │ Node adapter │ ─────────────▶ │ NodeEventBus │ ─────────▶ │ Processing loop │
//! └──────────────┘                └──────────────┘            └─────────────────┘
//! ```
//!
//! There is exactly one consumer. Publishers wait when the channel is full,
//! so a slow consumer applies backpressure to the node adapter instead of
//! dropping notifications.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{EventTopic, NodeEvent};
pub use publisher::{event_channel, EventPublisher, NodeEventBus};
pub use subscriber::{EventStream, SubscriptionError};

/// Maximum events buffered before publishers wait.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 1000);
    }
}
