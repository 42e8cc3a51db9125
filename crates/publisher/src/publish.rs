//! Publisher Implementation

use crate::Demographics;
use lab_protocol::Panel;
use message_bus::{NotificationEvent, NotificationKind, Receipt, Transport, TransportError};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Partition key for events without a region
pub const UNASSIGNED_KEY: &str = "unassigned";

/// Partition key for batch events
pub const BATCH_KEY: &str = "system";

/// Outcome of a publish, for logging and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStatus {
    Delivered(Receipt),
    /// Transient failure; the event was dropped but a retry could succeed
    Deferred(TransportError),
    Failed(TransportError),
}

impl PublishStatus {
    pub fn is_delivered(&self) -> bool {
        matches!(self, PublishStatus::Delivered(_))
    }
}

/// Non-blocking notification publisher
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Partition key for an event
    pub fn key_for(event: &NotificationEvent) -> &str {
        match event.kind {
            NotificationKind::BatchProcessed => BATCH_KEY,
            _ => event.region.as_deref().unwrap_or(UNASSIGNED_KEY),
        }
    }

    /// Publish an event. Never fails; the outcome is logged.
    pub fn publish(&self, event: NotificationEvent) -> PublishStatus {
        let key = Self::key_for(&event);

        match self.transport.send(key, &event) {
            Ok(receipt) => {
                counter!("publisher_events_total", "outcome" => "delivered").increment(1);
                match receipt {
                    Receipt::Acknowledged { partition, offset } => info!(
                        "Published {} event {} (key: {}, partition: {}, offset: {})",
                        event.kind, event.event_id, key, partition, offset
                    ),
                    Receipt::Queued => info!(
                        "Queued {} event {} (key: {})",
                        event.kind, event.event_id, key
                    ),
                }
                PublishStatus::Delivered(receipt)
            }
            Err(e) if e.is_transient() => {
                counter!("publisher_events_total", "outcome" => "deferred").increment(1);
                warn!("Transient failure publishing event {}: {}", event.event_id, e);
                PublishStatus::Deferred(e)
            }
            Err(e) => {
                counter!("publisher_events_total", "outcome" => "failed").increment(1);
                error!("Failed to publish event {}: {}", event.event_id, e);
                PublishStatus::Failed(e)
            }
        }
    }

    /// Publish a risk event for an at-risk panel. Returns None for panels
    /// that are not at risk.
    pub fn publish_risk(
        &self,
        panel: &Panel,
        demographics: Option<&Demographics>,
    ) -> Option<PublishStatus> {
        if !panel.risk_flag() {
            debug!("Panel {} not at risk, nothing to publish", panel.id);
            return None;
        }

        let mut event = NotificationEvent::new(
            NotificationKind::RiskDetected,
            panel.risk_reasons().join("; "),
        )
        .with_panel(panel.id.clone(), panel.subject_id.clone());

        if let Some(d) = demographics {
            event = event
                .with_location(d.region.clone(), d.state.clone())
                .with_demographics(d.bucket(), d.sex.clone());
        }

        Some(self.publish(event))
    }

    /// Publish updated totals for a region
    pub fn publish_stats(&self, region: &str, total: usize) -> PublishStatus {
        let event = NotificationEvent::new(
            NotificationKind::StatsUpdated,
            format!("Total cases: {}", total),
        )
        .with_location(Some(region.to_string()), None);

        self.publish(event)
    }

    /// Publish a batch summary
    pub fn publish_batch(&self, processed: usize, at_risk: usize) -> PublishStatus {
        let event = NotificationEvent::new(
            NotificationKind::BatchProcessed,
            format!("Processed: {} | At risk: {}", processed, at_risk),
        );

        self.publish(event)
    }
}
