//! Notification Relay
//!
//! Consumes events from an `EventSource` (the in-memory broker or an MQTT
//! subscriber), persists them, pushes them to live subscribers and only then
//! commits the offset. Failed deliveries are retried with a fixed backoff,
//! then handed to a dead-letter sink and skipped.

mod broadcast;
mod dead_letter;
mod worker;

pub use broadcast::{
    realtime_payload, Broadcast, BroadcastBus, BroadcastError, GLOBAL_CHANNEL,
    DEFAULT_BROADCAST_CAPACITY,
};
pub use dead_letter::{DeadLetterSink, LoggingDeadLetterSink};
pub use worker::{DeliveryState, Relay, RelayConfig, RelayHandle};
