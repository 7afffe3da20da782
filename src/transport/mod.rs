//! Message bus transport.
//!
//! The service only sees the [`Transport`] trait. Reconnects surface as a
//! fresh [`TransportEvent::Connected`], which is the cue to subscribe again.

pub mod memory;
pub mod mqtt;

pub use memory::{MemoryBus, MemoryTransport};
pub use mqtt::MqttTransport;

use crate::error::Result;

/// Something that happened on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// (Re)connected to the broker; subscriptions must be renewed
    Connected,
    /// Lost the broker; the transport keeps retrying on its own
    Disconnected { reason: String },
    Message { topic: String, payload: Vec<u8> },
}

/// Bus client used by the service.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Subscribe to `topics`. Called again after every reconnect.
    async fn subscribe(&mut self, topics: &[String]) -> Result<()>;

    /// Publish `payload` on `topic`.
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Waits for the next event; `None` once the transport is closed for good.
    ///
    /// Must be cancel safe, it is polled inside `tokio::select!`.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Flushes queued publishes and leaves the bus.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
