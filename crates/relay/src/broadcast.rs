//! Live Subscriber Broadcast

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use storage::Notification;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Channel every notification is sent to
pub const GLOBAL_CHANNEL: &str = "notifications";

/// Default per-channel buffer (messages)
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Broadcast errors
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Broadcast bus closed")]
    Closed,
    #[error("Delivery failed on {channel}: {reason}")]
    Delivery { channel: String, reason: String },
}

/// Push channel to live subscribers
pub trait Broadcast: Send + Sync {
    fn send(&self, channel: &str, payload: &Value) -> Result<(), BroadcastError>;
}

/// Channel name for a notification kind
pub fn kind_channel(kind: &str) -> String {
    format!("{}/kind/{}", GLOBAL_CHANNEL, kind)
}

/// Channel name for a region
pub fn region_channel(region: &str) -> String {
    format!("{}/region/{}", GLOBAL_CHANNEL, region)
}

/// Real-time envelope pushed to subscribers
pub fn realtime_payload(notification: &Notification) -> Value {
    json!({
        "type": "REALTIME_NOTIFICATION",
        "action": "NEW_NOTIFICATION",
        "timestamp": Utc::now().to_rfc3339(),
        "data": notification,
        "message": "New notification received in real time",
    })
}

/// In-process broadcast bus with named channels
pub struct BroadcastBus {
    channels: RwLock<HashMap<String, broadcast::Sender<Value>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        info!("Creating broadcast bus (capacity {})", capacity);
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to a channel, creating it on first use
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Value> {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Current subscriber count for a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Reject further sends
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl Broadcast for BroadcastBus {
    fn send(&self, channel: &str, payload: &Value) -> Result<(), BroadcastError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BroadcastError::Closed);
        }

        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        match channels.get(channel) {
            // Sending with no live receivers is not an error
            Some(tx) => {
                let delivered = tx.send(payload.clone()).unwrap_or(0);
                debug!("Broadcast on {} reached {} subscribers", channel, delivered);
            }
            None => debug!("No subscribers on {}", channel),
        }
        Ok(())
    }
}
