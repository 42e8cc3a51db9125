//! Relay Workers

use crate::broadcast::{kind_channel, realtime_payload, region_channel, Broadcast, GLOBAL_CHANNEL};
use crate::dead_letter::{DeadLetterSink, LoggingDeadLetterSink};
use message_bus::{Envelope, EventSource};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use storage::{NewNotification, Notification, NotificationRepository, StorageError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Worker tasks; partition `p` is handled by worker `p % concurrency`
    pub concurrency: usize,
    /// Retries after the first failed attempt
    pub retry_count: u32,
    /// Fixed delay between attempts (ms)
    pub retry_backoff_ms: u64,
    /// Idle poll interval when no wakeup arrives (ms)
    pub poll_interval_ms: u64,
    /// Hard deadline for graceful shutdown (ms)
    pub shutdown_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            retry_count: 3,
            retry_backoff_ms: 1000,
            poll_interval_ms: 250,
            shutdown_timeout_ms: 30_000,
        }
    }
}

/// Lifecycle of a single envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Persisting,
    Broadcasting,
    Acknowledged,
    /// Attempt number that failed
    Failed(u32),
    DeadLettered,
}

/// Consumes an event source and relays events to storage and live subscribers
#[derive(Clone)]
pub struct Relay {
    source: Arc<dyn EventSource>,
    repository: Arc<dyn NotificationRepository>,
    broadcast: Arc<dyn Broadcast>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: RelayConfig,
}

impl Relay {
    pub fn new(
        source: Arc<dyn EventSource>,
        repository: Arc<dyn NotificationRepository>,
        broadcast: Arc<dyn Broadcast>,
        config: RelayConfig,
    ) -> Self {
        Self {
            source,
            repository,
            broadcast,
            dead_letters: Arc::new(LoggingDeadLetterSink),
            config,
        }
    }

    /// Replace the default log-and-drop dead-letter sink
    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = sink;
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Spawn the worker tasks
    pub fn start(&self) -> RelayHandle {
        let concurrency = self.config.concurrency.max(1);
        let partition_count = self.source.partition_count();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = (0..concurrency)
            .filter_map(|worker| {
                let partitions: Vec<usize> = (0..partition_count)
                    .filter(|p| p % concurrency == worker)
                    .collect();
                if partitions.is_empty() {
                    return None;
                }
                let relay = self.clone();
                let shutdown = shutdown_rx.clone();
                Some(tokio::spawn(async move {
                    relay.run_worker(worker, partitions, shutdown).await
                }))
            })
            .collect::<Vec<_>>();

        info!(
            "Relay started: {} workers over {} partitions",
            tasks.len(),
            partition_count
        );

        RelayHandle {
            shutdown_tx,
            tasks,
            timeout: Duration::from_millis(self.config.shutdown_timeout_ms),
        }
    }

    async fn run_worker(
        &self,
        worker: usize,
        partitions: Vec<usize>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut positions: Vec<(usize, u64)> = partitions
            .iter()
            .map(|&p| (p, self.source.committed(p)))
            .collect();

        debug!("Worker {} consuming partitions {:?}", worker, partitions);

        'run: loop {
            let notified = self.source.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut progressed = false;
            for (partition, position) in positions.iter_mut() {
                *position = (*position).max(self.source.committed(*partition));

                while let Some(envelope) = self.source.fetch(*partition, *position) {
                    self.deliver(&envelope).await;
                    *position = envelope.offset + 1;
                    progressed = true;

                    if *shutdown.borrow() {
                        break 'run;
                    }
                }
            }

            if *shutdown.borrow() {
                break;
            }
            if progressed {
                continue;
            }

            tokio::select! {
                _ = &mut notified => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!("Worker {} stopped", worker);
    }

    /// Deliver one envelope, retrying with a fixed backoff.
    ///
    /// Returns `Acknowledged` or `DeadLettered`. A dead-lettered envelope is
    /// skipped rather than committed, so no later consumer retries it.
    pub async fn deliver(&self, envelope: &Envelope) -> DeliveryState {
        let event_id = envelope.event.event_id;
        let max_attempts = self.config.retry_count + 1;
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);

        debug!("Event {} {:?}", event_id, DeliveryState::Received);

        let mut attempt = 1;
        loop {
            match self.process(envelope) {
                Ok(notification) => {
                    self.source.commit(envelope.partition, envelope.offset);
                    counter!("relay_events_total", "outcome" => "acknowledged").increment(1);
                    info!(
                        "Event {} {:?} as notification {} (partition {}, offset {})",
                        event_id,
                        DeliveryState::Acknowledged,
                        notification.id,
                        envelope.partition,
                        envelope.offset
                    );
                    return DeliveryState::Acknowledged;
                }
                Err(e) => {
                    warn!(
                        "Event {} {:?} of {}: {}",
                        event_id,
                        DeliveryState::Failed(attempt),
                        max_attempts,
                        e
                    );

                    if attempt >= max_attempts {
                        counter!("relay_events_total", "outcome" => "dead_lettered").increment(1);
                        self.dead_letters.dead_letter(envelope, attempt, &e);
                        self.source.skip(envelope.partition, envelope.offset);
                        return DeliveryState::DeadLettered;
                    }

                    counter!("relay_retries_total").increment(1);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    fn process(&self, envelope: &Envelope) -> Result<Notification, StorageError> {
        let event_id = envelope.event.event_id;

        debug!("Event {} {:?}", event_id, DeliveryState::Persisting);
        let saved = self.repository.save(NewNotification::from(&envelope.event))?;

        debug!("Event {} {:?}", event_id, DeliveryState::Broadcasting);
        self.broadcast_notification(&saved);

        Ok(saved)
    }

    fn broadcast_notification(&self, notification: &Notification) {
        let payload = realtime_payload(notification);

        let mut channels = vec![
            GLOBAL_CHANNEL.to_string(),
            kind_channel(notification.kind.as_str()),
        ];
        if let Some(region) = &notification.region {
            channels.push(region_channel(region));
        }

        for channel in &channels {
            if let Err(e) = self.broadcast.send(channel, &payload) {
                counter!("relay_broadcast_failures_total").increment(1);
                warn!(
                    "Broadcast to {} failed for notification {}: {}",
                    channel, notification.id, e
                );
            }
        }
    }
}

/// Handle to running relay workers
pub struct RelayHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl RelayHandle {
    /// Number of running worker tasks
    pub fn worker_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal workers to stop after their in-flight envelope, aborting any
    /// still running at the deadline. Returns true if all stopped in time.
    pub async fn shutdown(self) -> bool {
        info!("Shutting down relay ({} workers)", self.tasks.len());
        let _ = self.shutdown_tx.send(true);

        let deadline = Instant::now() + self.timeout;
        let mut clean = true;

        for mut task in self.tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!("Relay worker missed shutdown deadline, aborting");
                task.abort();
                clean = false;
            }
        }

        info!("Relay stopped (clean: {})", clean);
        clean
    }
}
