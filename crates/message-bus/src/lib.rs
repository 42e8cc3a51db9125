//! Notification Message Bus
//!
//! Carries notification events from the publisher to the relay:
//! - Keyed, partitioned in-memory broker with manual offset commits
//! - MQTT transport and subscriber for networked deployments
//! - A `Transport` seam for producers and an `EventSource` seam for consumers

mod broker;
mod event;
mod mqtt;

pub use broker::{BrokerConfig, Envelope, InMemoryBroker};
pub use event::{NotificationEvent, NotificationKind};
pub use mqtt::{MqttConfig, MqttSubscriber, MqttTransport};

use thiserror::Error;
use tokio::sync::futures::Notified;

/// Transport error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Partition queue full")]
    Backpressure,

    #[error("Transport disconnected: {0}")]
    Disconnected(String),

    #[error("Channel closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TransportError {
    /// Whether a later attempt may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Backpressure | TransportError::Disconnected(_))
    }
}

/// Delivery receipt returned by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// Appended to a partition log
    Acknowledged { partition: usize, offset: u64 },
    /// Handed to a network client queue, not yet confirmed
    Queued,
}

/// Outbound channel for notification events
pub trait Transport: Send + Sync {
    /// Send an event under a partition key. Must not block.
    fn send(&self, key: &str, event: &NotificationEvent) -> Result<Receipt, TransportError>;
}

/// Inbound side of the bus: partitioned, offset-addressed, manually committed
pub trait EventSource: Send + Sync {
    fn partition_count(&self) -> usize;

    /// Next deliverable envelope at or after `offset`
    fn fetch(&self, partition: usize, offset: u64) -> Option<Envelope>;

    /// Acknowledge everything up to and including `offset`
    fn commit(&self, partition: usize, offset: u64);

    /// Settle `offset` without acknowledging it as processed
    fn skip(&self, partition: usize, offset: u64);

    /// Next offset a fresh consumer starts from
    fn committed(&self, partition: usize) -> u64;

    /// Events neither committed nor skipped
    fn pending(&self) -> u64;

    /// Resolves on the next arrival or close
    fn notified(&self) -> Notified<'_>;

    fn close(&self);
}
