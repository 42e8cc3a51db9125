//! Service Wiring

use crate::{Pipeline, PipelineConfig};
use message_bus::{EventSource, InMemoryBroker, MqttSubscriber, MqttTransport, Transport};
use publisher::SubjectDirectory;
use relay::{BroadcastBus, Relay, RelayHandle};
use std::sync::Arc;
use std::time::Duration;
use storage::InMemoryNotificationRepository;
use tokio::time::Instant;
use tracing::{info, warn};

/// A running pipeline with its relay
pub struct Service {
    pipeline: Arc<Pipeline>,
    source: Arc<dyn EventSource>,
    repository: Arc<InMemoryNotificationRepository>,
    broadcast: Arc<BroadcastBus>,
    relay: RelayHandle,
}

impl Service {
    /// Build every component and start the relay workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &PipelineConfig, directory: Arc<dyn SubjectDirectory>) -> Self {
        let (transport, source): (Arc<dyn Transport>, Arc<dyn EventSource>) =
            if config.mqtt.enabled {
                info!("Relaying notifications over MQTT");
                (
                    Arc::new(MqttTransport::connect(&config.mqtt)),
                    MqttSubscriber::connect(&config.mqtt, config.broker.clone()),
                )
            } else {
                let broker = Arc::new(InMemoryBroker::new(config.broker.clone()));
                (broker.clone(), broker)
            };

        let repository = Arc::new(InMemoryNotificationRepository::with_retention(
            config.notifications.retention,
        ));
        let broadcast = Arc::new(BroadcastBus::new(config.notifications.broadcast_capacity));

        let relay = Relay::new(
            source.clone(),
            repository.clone(),
            broadcast.clone(),
            config.relay.clone(),
        )
        .start();

        let pipeline = Arc::new(Pipeline::new(config, transport, directory));

        Self {
            pipeline,
            source,
            repository,
            broadcast,
            relay,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn repository(&self) -> &Arc<InMemoryNotificationRepository> {
        &self.repository
    }

    pub fn broadcast(&self) -> &Arc<BroadcastBus> {
        &self.broadcast
    }

    /// Where the relay reads events from
    pub fn source(&self) -> &Arc<dyn EventSource> {
        &self.source
    }

    /// Wait until the relay has committed or skipped every received event.
    /// Returns false on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.source.pending() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("{} events still pending after drain timeout", self.source.pending());
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Stop accepting events and shut the relay down
    pub async fn shutdown(self) -> bool {
        self.source.close();
        self.relay.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_bus::NotificationKind;
    use publisher::{Demographics, InMemorySubjectDirectory};
    use relay::GLOBAL_CHANNEL;
    use serde_json::json;
    use storage::NotificationRepository;

    fn payload() -> Vec<u8> {
        json!({
            "resourceType": "Observation",
            "id": "obs-9",
            "code": { "coding": [{ "display": "Complete Blood Count" }] },
            "subject": { "reference": "Patient/p-9" },
            "effectiveDateTime": "2024-05-02",
            "component": [
                {
                    "code": { "coding": [{ "code": "731-0" }] },
                    "valueQuantity": { "value": 800, "unit": "/uL" }
                }
            ]
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_notification() {
        let directory = Arc::new(InMemorySubjectDirectory::new());
        directory.insert(
            "p-9",
            Demographics {
                region: Some("south".into()),
                ..Default::default()
            },
        );

        let service = Service::start(&PipelineConfig::default(), directory);
        let mut live = service.broadcast().subscribe(GLOBAL_CHANNEL);

        let report = service.pipeline().ingest(&payload()).unwrap();
        assert_eq!(report.at_risk, 1);

        assert!(service.drain(Duration::from_secs(10)).await);

        let repository = service.repository();
        assert_eq!(repository.find_by_kind(NotificationKind::RiskDetected).unwrap().len(), 1);
        assert_eq!(repository.find_by_kind(NotificationKind::BatchProcessed).unwrap().len(), 1);
        assert_eq!(repository.find_by_region("south").unwrap().len(), 2);

        let first = live.recv().await.unwrap();
        assert_eq!(first["type"], "REALTIME_NOTIFICATION");

        assert!(service.shutdown().await);
    }
}
