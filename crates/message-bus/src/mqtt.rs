//! MQTT Transport and Subscriber
//!
//! The transport publishes events to `{prefix}/{key}` with QoS 1. The
//! subscriber consumes `{prefix}/#` with manual acks and buffers arrivals in
//! a partitioned log, acking each message to the MQTT broker only once the
//! relay commits or skips it.

use crate::{
    BrokerConfig, Envelope, EventSource, InMemoryBroker, NotificationEvent, Receipt, Transport,
    TransportError,
};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::futures::Notified;
use tracing::{debug, error, info, warn};

/// MQTT transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Use MQTT instead of the in-memory broker for both publishing and relaying
    pub enabled: bool,
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client id; the relay subscriber connects as `{client_id}-relay`
    pub client_id: String,
    /// Topic prefix; events go to `{prefix}/{key}`
    pub topic_prefix: String,
    /// Keep-alive interval (seconds)
    pub keep_alive_secs: u64,
    /// Client request queue size
    pub queue_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            client_id: "labwatch".to_string(),
            topic_prefix: "labwatch/notifications".to_string(),
            keep_alive_secs: 30,
            queue_capacity: 64,
        }
    }
}

/// Publishes events to an MQTT broker with QoS 1
pub struct MqttTransport {
    client: AsyncClient,
    topic_prefix: String,
}

impl MqttTransport {
    /// Build the client without driving its event loop
    pub fn new(config: &MqttConfig) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

        let (client, eventloop) = AsyncClient::new(options, config.queue_capacity.max(1));
        let transport = Self {
            client,
            topic_prefix: config.topic_prefix.trim_end_matches('/').to_string(),
        };
        (transport, eventloop)
    }

    /// Build the client and spawn its event loop on the current runtime
    pub fn connect(config: &MqttConfig) -> Self {
        let (transport, mut eventloop) = Self::new(config);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(incoming)) => {
                        debug!("MQTT incoming: {:?}", incoming);
                    }
                    Err(e) => {
                        error!("MQTT error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    _ => {}
                }
            }
        });

        info!("MQTT transport started for {}:{}", config.host, config.port);
        transport
    }

    /// Topic for a partition key
    pub fn topic_for(&self, key: &str) -> String {
        format!("{}/{}", self.topic_prefix, key)
    }
}

impl Transport for MqttTransport {
    fn send(&self, key: &str, event: &NotificationEvent) -> Result<Receipt, TransportError> {
        let payload =
            serde_json::to_vec(event).map_err(|e| TransportError::Serialization(e.to_string()))?;

        self.client
            .try_publish(self.topic_for(key), QoS::AtLeastOnce, false, payload)
            .map_err(|e| TransportError::Disconnected(e.to_string()))?;

        Ok(Receipt::Queued)
    }
}

/// Consumes relayed events from an MQTT broker.
///
/// Messages are acked to the broker only after the relay commits or skips
/// their offset, so an event that was never processed is redelivered by the
/// MQTT broker after a reconnect.
pub struct MqttSubscriber {
    client: AsyncClient,
    buffer: InMemoryBroker,
    unacked: Mutex<HashMap<(usize, u64), Publish>>,
    topic_prefix: String,
}

impl MqttSubscriber {
    /// Build the subscriber without driving its event loop
    pub fn new(config: &MqttConfig, buffer: BrokerConfig) -> (Self, EventLoop) {
        let client_id = format!("{}-relay", config.client_id);
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_manual_acks(true);
        options.set_clean_session(false);

        let (client, eventloop) = AsyncClient::new(options, config.queue_capacity.max(1));
        let subscriber = Self {
            client,
            buffer: InMemoryBroker::new(buffer),
            unacked: Mutex::new(HashMap::new()),
            topic_prefix: config.topic_prefix.trim_end_matches('/').to_string(),
        };
        (subscriber, eventloop)
    }

    /// Build the subscriber and spawn its event loop on the current runtime.
    ///
    /// The subscription is (re)issued on every connection acknowledgement.
    pub fn connect(config: &MqttConfig, buffer: BrokerConfig) -> Arc<Self> {
        let (subscriber, mut eventloop) = Self::new(config, buffer);
        let subscriber = Arc::new(subscriber);

        let consumer = subscriber.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        let filter = consumer.topic_filter();
                        info!("MQTT subscriber connected, subscribing to {}", filter);
                        if let Err(e) = consumer.client.try_subscribe(filter, QoS::AtLeastOnce) {
                            error!("MQTT subscribe failed: {}", e);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        consumer.accept(publish);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if consumer.buffer.is_closed() {
                            break;
                        }
                        error!("MQTT subscriber error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
            debug!("MQTT subscriber event loop stopped");
        });

        info!("MQTT subscriber started for {}:{}", config.host, config.port);
        subscriber
    }

    /// Topic filter covering every partition key
    pub fn topic_filter(&self) -> String {
        format!("{}/#", self.topic_prefix)
    }

    /// Buffer an incoming message for the relay.
    ///
    /// Undecodable payloads are acked and dropped. A message that cannot be
    /// buffered stays unacked and is redelivered by the broker.
    pub fn accept(&self, publish: Publish) {
        let key = publish
            .topic
            .strip_prefix(&self.topic_prefix)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(&publish.topic)
            .to_string();

        let event: NotificationEvent = match serde_json::from_slice(&publish.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping undecodable message on {}: {}", publish.topic, e);
                self.ack(&publish);
                return;
            }
        };

        match self.buffer.publish(&key, event) {
            Ok(Receipt::Acknowledged { partition, offset }) => {
                debug!(
                    "Buffered {} at partition {} offset {}",
                    publish.topic, partition, offset
                );
                self.unacked
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert((partition, offset), publish);
            }
            Ok(Receipt::Queued) => {}
            Err(e) => warn!("Could not buffer message on {}: {}", publish.topic, e),
        }
    }

    /// Messages buffered but not yet acked to the MQTT broker
    pub fn unacked_count(&self) -> usize {
        self.unacked.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn ack(&self, publish: &Publish) {
        if let Err(e) = self.client.try_ack(publish) {
            warn!("MQTT ack for {} failed: {}", publish.topic, e);
        }
    }

    /// Ack buffered messages of `partition` below `through`
    fn ack_through(&self, partition: usize, through: u64) {
        let mut unacked = self.unacked.lock().unwrap_or_else(|e| e.into_inner());
        let done: Vec<_> = unacked
            .keys()
            .filter(|(p, offset)| *p == partition && *offset < through)
            .copied()
            .collect();
        for key in done {
            if let Some(publish) = unacked.remove(&key) {
                self.ack(&publish);
            }
        }
    }
}

impl EventSource for MqttSubscriber {
    fn partition_count(&self) -> usize {
        self.buffer.partition_count()
    }

    fn fetch(&self, partition: usize, offset: u64) -> Option<Envelope> {
        self.buffer.fetch(partition, offset)
    }

    fn commit(&self, partition: usize, offset: u64) {
        self.buffer.commit(partition, offset);
        self.ack_through(partition, self.buffer.committed(partition));
    }

    fn skip(&self, partition: usize, offset: u64) {
        self.buffer.skip(partition, offset);
        let skipped = self
            .unacked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(partition, offset));
        if let Some(publish) = skipped {
            self.ack(&publish);
        }
        self.ack_through(partition, self.buffer.committed(partition));
    }

    fn committed(&self, partition: usize) -> u64 {
        self.buffer.committed(partition)
    }

    fn pending(&self) -> u64 {
        self.buffer.pending()
    }

    fn notified(&self) -> Notified<'_> {
        self.buffer.notified()
    }

    fn close(&self) {
        self.buffer.close();
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT subscriber disconnect: {}", e);
        }
    }
}
