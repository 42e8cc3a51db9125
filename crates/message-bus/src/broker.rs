//! In-Memory Partitioned Broker
//!
//! Events are appended to one of N partition logs chosen by a stable hash of
//! the key. Consumers fetch by offset and commit manually; records are only
//! trimmed once a commit passes them, so an uncommitted record is redelivered
//! to whichever consumer next starts from the committed offset.

use crate::{EventSource, NotificationEvent, Receipt, Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Number of partitions (default: 6)
    pub partitions: usize,
    /// Maximum uncommitted records per partition (default: 10 000)
    pub partition_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            partitions: 6,
            partition_capacity: 10_000,
        }
    }
}

/// An event as stored in a partition
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub event: NotificationEvent,
}

#[derive(Default)]
struct PartitionLog {
    /// Offset of the first retained record
    base: u64,
    records: VecDeque<Envelope>,
    /// Next offset to deliver after a restart
    committed: u64,
    /// Handed-off offsets past `committed` (dead-lettered, never acknowledged)
    skipped: BTreeSet<u64>,
}

impl PartitionLog {
    fn end(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    fn pending(&self) -> u64 {
        self.end() - self.committed - self.skipped.len() as u64
    }

    /// Move `committed` over contiguous skipped offsets and trim the log
    fn settle(&mut self) {
        self.skipped = self.skipped.split_off(&self.committed);
        while self.skipped.remove(&self.committed) {
            self.committed += 1;
        }
        while self.base < self.committed && self.records.pop_front().is_some() {
            self.base += 1;
        }
    }
}

/// Partitioned in-memory broker
pub struct InMemoryBroker {
    partitions: Vec<Mutex<PartitionLog>>,
    partition_capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        let count = config.partitions.max(1);
        info!(
            "Creating in-memory broker: {} partitions, capacity {}",
            count, config.partition_capacity
        );
        Self {
            partitions: (0..count).map(|_| Mutex::new(PartitionLog::default())).collect(),
            partition_capacity: config.partition_capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn log(&self, partition: usize) -> Option<MutexGuard<'_, PartitionLog>> {
        self.partitions
            .get(partition)
            .map(|p| p.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition a key maps to (FNV-1a, stable across runs)
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in key.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % self.partitions.len() as u64) as usize
    }

    /// Append an event, returning its partition and offset
    pub fn publish(&self, key: &str, event: NotificationEvent) -> Result<Receipt, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let partition = self.partition_for(key);
        let offset = {
            let Some(mut log) = self.log(partition) else {
                return Err(TransportError::Closed);
            };

            let pending = log.end() - log.committed;
            if pending >= self.partition_capacity as u64 {
                warn!("Partition {} full ({} pending)", partition, pending);
                return Err(TransportError::Backpressure);
            }

            let offset = log.end();
            log.records.push_back(Envelope {
                partition,
                offset,
                key: key.to_string(),
                event,
            });
            offset
        };

        debug!("Appended to partition {} at offset {}", partition, offset);
        self.notify.notify_waiters();

        Ok(Receipt::Acknowledged { partition, offset })
    }

    /// Next deliverable envelope at or after `offset`. Trimmed and skipped
    /// offsets are passed over.
    pub fn fetch(&self, partition: usize, offset: u64) -> Option<Envelope> {
        let log = self.log(partition)?;
        let mut offset = offset.max(log.committed);
        while log.skipped.contains(&offset) {
            offset += 1;
        }
        let index = offset.checked_sub(log.base)?;
        log.records.get(index as usize).cloned()
    }

    /// Mark everything up to and including `offset` as processed
    pub fn commit(&self, partition: usize, offset: u64) {
        let Some(mut log) = self.log(partition) else {
            return;
        };

        let next = offset + 1;
        if next <= log.committed {
            return;
        }
        log.committed = next.min(log.end());
        log.settle();
        debug!("Partition {} committed through offset {}", partition, offset);
    }

    /// Record `offset` as handed off without acknowledging it. A consumer
    /// starting from the committed offset passes over it and it no longer
    /// counts as pending.
    pub fn skip(&self, partition: usize, offset: u64) {
        let Some(mut log) = self.log(partition) else {
            return;
        };
        if offset < log.committed || offset >= log.end() {
            return;
        }

        log.skipped.insert(offset);
        log.settle();
        debug!("Partition {} skipped offset {}", partition, offset);
    }

    /// Next offset a fresh consumer of `partition` starts from
    pub fn committed(&self, partition: usize) -> u64 {
        self.log(partition).map(|log| log.committed).unwrap_or(0)
    }

    /// Records neither committed nor skipped, across all partitions
    pub fn pending(&self) -> u64 {
        (0..self.partitions.len())
            .filter_map(|p| self.log(p).map(|log| log.pending()))
            .sum()
    }

    /// Future that resolves on the next append or close.
    ///
    /// Create it before checking for records to avoid missing a wakeup.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Refuse further publishes and wake every waiting consumer
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        info!("Broker closed with {} pending records", self.pending());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl Transport for InMemoryBroker {
    fn send(&self, key: &str, event: &NotificationEvent) -> Result<Receipt, TransportError> {
        self.publish(key, event.clone())
    }
}

impl EventSource for InMemoryBroker {
    fn partition_count(&self) -> usize {
        InMemoryBroker::partition_count(self)
    }

    fn fetch(&self, partition: usize, offset: u64) -> Option<Envelope> {
        InMemoryBroker::fetch(self, partition, offset)
    }

    fn commit(&self, partition: usize, offset: u64) {
        InMemoryBroker::commit(self, partition, offset)
    }

    fn skip(&self, partition: usize, offset: u64) {
        InMemoryBroker::skip(self, partition, offset)
    }

    fn committed(&self, partition: usize) -> u64 {
        InMemoryBroker::committed(self, partition)
    }

    fn pending(&self) -> u64 {
        InMemoryBroker::pending(self)
    }

    fn notified(&self) -> Notified<'_> {
        InMemoryBroker::notified(self)
    }

    fn close(&self) {
        InMemoryBroker::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NotificationKind;
    use proptest::prelude::*;

    fn event(reason: &str) -> NotificationEvent {
        NotificationEvent::new(NotificationKind::RiskDetected, reason)
    }

    #[test]
    fn test_publish_and_fetch() {
        let broker = InMemoryBroker::default();
        let receipt = broker.publish("north", event("first")).unwrap();

        let Receipt::Acknowledged { partition, offset } = receipt else {
            panic!("expected acknowledged receipt");
        };
        assert_eq!(offset, 0);
        assert_eq!(partition, broker.partition_for("north"));

        let envelope = broker.fetch(partition, 0).unwrap();
        assert_eq!(envelope.key, "north");
        assert_eq!(envelope.event.reason, "first");
        assert!(broker.fetch(partition, 1).is_none());
    }

    #[test]
    fn test_same_key_preserves_order() {
        let broker = InMemoryBroker::default();
        for i in 0..5 {
            broker.publish("south", event(&i.to_string())).unwrap();
        }

        let partition = broker.partition_for("south");
        let reasons: Vec<_> = (0..5)
            .map(|o| broker.fetch(partition, o).unwrap().event.reason)
            .collect();
        assert_eq!(reasons, ["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_commit_trims_and_uncommitted_survives() {
        let broker = InMemoryBroker::default();
        let partition = broker.partition_for("k");
        broker.publish("k", event("a")).unwrap();
        broker.publish("k", event("b")).unwrap();

        broker.commit(partition, 0);
        assert_eq!(broker.committed(partition), 1);
        // trimmed offsets resolve to the first retained record
        assert_eq!(broker.fetch(partition, 0).unwrap().offset, 1);
        assert_eq!(broker.fetch(partition, 1).unwrap().event.reason, "b");
        assert_eq!(broker.pending(), 1);

        // stale commits are ignored
        broker.commit(partition, 0);
        assert_eq!(broker.committed(partition), 1);
    }

    #[test]
    fn test_skip_moves_past_without_processing() {
        let broker = InMemoryBroker::new(BrokerConfig {
            partitions: 1,
            partition_capacity: 10,
        });
        for reason in ["a", "b", "c"] {
            broker.publish("k", event(reason)).unwrap();
        }

        // a hole after an unprocessed record does not move the commit point
        broker.skip(0, 1);
        assert_eq!(broker.committed(0), 0);
        assert_eq!(broker.pending(), 2);
        assert_eq!(broker.fetch(0, 1).unwrap().event.reason, "c");

        // committing offset 0 closes the gap up to the skipped record
        broker.commit(0, 0);
        assert_eq!(broker.committed(0), 2);
        assert_eq!(broker.pending(), 1);

        broker.skip(0, 2);
        assert_eq!(broker.committed(0), 3);
        assert_eq!(broker.pending(), 0);
        assert!(broker.fetch(0, 0).is_none());

        // out-of-range and already-committed offsets are ignored
        broker.skip(0, 0);
        broker.skip(0, 7);
        assert_eq!(broker.committed(0), 3);
        assert_eq!(broker.pending(), 0);
    }

    #[test]
    fn test_backpressure() {
        let broker = InMemoryBroker::new(BrokerConfig {
            partitions: 1,
            partition_capacity: 2,
        });
        broker.publish("k", event("1")).unwrap();
        broker.publish("k", event("2")).unwrap();

        let err = broker.publish("k", event("3")).unwrap_err();
        assert_eq!(err, TransportError::Backpressure);
        assert!(err.is_transient());

        broker.commit(0, 0);
        assert!(broker.publish("k", event("3")).is_ok());
    }

    #[test]
    fn test_closed_rejects_publish() {
        let broker = InMemoryBroker::default();
        broker.close();

        let err = broker.send("k", &event("x")).unwrap_err();
        assert_eq!(err, TransportError::Closed);
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_notified_on_publish() {
        let broker = std::sync::Arc::new(InMemoryBroker::default());
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move {
                let notified = broker.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if broker.fetch(broker.partition_for("k"), 0).is_none() {
                    notified.await;
                }
                broker.fetch(broker.partition_for("k"), 0).is_some()
            })
        };

        tokio::task::yield_now().await;
        broker.publish("k", event("wake")).unwrap();
        assert!(waiter.await.unwrap());
    }

    proptest! {
        #[test]
        fn prop_partition_is_stable_and_in_range(key in ".{0,32}", partitions in 1usize..16) {
            let broker = InMemoryBroker::new(BrokerConfig { partitions, partition_capacity: 1 });
            let p = broker.partition_for(&key);
            prop_assert!(p < partitions);
            prop_assert_eq!(p, broker.partition_for(&key));
        }
    }
}
