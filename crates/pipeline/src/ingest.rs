//! Ingest Path

use crate::PipelineConfig;
use lab_protocol::{PanelParser, ParseError};
use message_bus::Transport;
use metrics::counter;
use publisher::{Publisher, SubjectDirectory};
use result_store::ResultStore;
use risk_classifier::RiskClassifier;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Ingest errors
#[derive(Debug, Error)]
pub enum IngestError {
    /// The whole payload was rejected
    #[error("Malformed payload: {0}")]
    Parse(#[from] ParseError),
}

/// Per-payload ingest counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Panels classified and stored
    pub accepted: usize,
    /// Panels classified but older than everything the full store retains
    pub aged_out: usize,
    /// Panels of interest discarded (no usable id)
    pub rejected: usize,
    /// Records that were not panels of interest
    pub skipped: usize,
    /// Classified panels flagged at risk
    pub at_risk: usize,
}

/// Synchronous ingest front of the pipeline
pub struct Pipeline {
    parser: PanelParser,
    classifier: RiskClassifier,
    store: Arc<ResultStore>,
    publisher: Publisher,
    directory: Arc<dyn SubjectDirectory>,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn SubjectDirectory>,
    ) -> Self {
        Self {
            parser: PanelParser::new(config.parser.max_payload_bytes),
            classifier: RiskClassifier::new(config.thresholds.clone()),
            store: Arc::new(ResultStore::new(config.store.capacity)),
            publisher: Publisher::new(transport),
            directory,
        }
    }

    /// Parse, classify and store a payload, publishing risk notifications.
    ///
    /// A malformed envelope rejects the whole payload. Notification delivery
    /// problems are logged and never surface here.
    pub fn ingest(&self, raw: &[u8]) -> Result<IngestReport, IngestError> {
        let outcome = match self.parser.parse_detailed(raw) {
            Ok(outcome) => outcome,
            Err(e) => {
                counter!("ingest_payloads_total", "outcome" => "rejected").increment(1);
                warn!("Rejected payload of {} bytes: {}", raw.len(), e);
                return Err(e.into());
            }
        };

        let mut report = IngestReport {
            rejected: outcome.rejected,
            skipped: outcome.skipped,
            ..Default::default()
        };
        let mut touched_regions = BTreeSet::new();

        for panel in outcome.panels {
            let panel = self.classifier.classify(panel);
            let id = panel.id.clone();
            let at_risk = panel.risk_flag().then(|| panel.clone());

            let inserted = self.store.insert(panel);
            match inserted.evicted {
                Some(evicted) if evicted == id => {
                    info!("Panel {} is older than every retained panel, not stored", id);
                    report.aged_out += 1;
                }
                Some(evicted) => {
                    debug!("Store evicted panel {}", evicted);
                    report.accepted += 1;
                }
                None => report.accepted += 1,
            }

            let Some(panel) = at_risk else {
                continue;
            };
            report.at_risk += 1;

            let demographics = panel
                .subject_id
                .as_deref()
                .and_then(|subject| self.directory.lookup(subject));
            self.publisher.publish_risk(&panel, demographics.as_ref());

            if let Some(region) = demographics.and_then(|d| d.region) {
                touched_regions.insert(region);
            }
        }

        for region in &touched_regions {
            self.publisher.publish_stats(region, self.region_at_risk(region));
        }
        let processed = report.accepted + report.aged_out;
        if processed > 0 {
            self.publisher.publish_batch(processed, report.at_risk);
        }

        counter!("ingest_payloads_total", "outcome" => "accepted").increment(1);
        counter!("ingest_panels_total").increment(report.accepted as u64);
        counter!("ingest_panels_at_risk_total").increment(report.at_risk as u64);
        info!(
            "Ingested payload: {} accepted, {} aged out, {} at risk, {} rejected, {} skipped",
            report.accepted, report.aged_out, report.at_risk, report.rejected, report.skipped
        );

        Ok(report)
    }

    /// At-risk panels currently retained whose subject lives in `region`
    fn region_at_risk(&self, region: &str) -> usize {
        self.store.count_where(|panel| {
            panel.risk_flag()
                && panel
                    .subject_id
                    .as_deref()
                    .and_then(|subject| self.directory.lookup(subject))
                    .and_then(|d| d.region)
                    .as_deref()
                    == Some(region)
        })
    }

    /// Query access to stored panels
    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_protocol::MeasurementKind;
    use message_bus::{BrokerConfig, InMemoryBroker, NotificationKind};
    use publisher::{Demographics, InMemorySubjectDirectory};
    use serde_json::{json, Value};

    fn component(code: &str, value: f64, unit: &str) -> Value {
        json!({
            "code": { "coding": [{ "system": "http://loinc.org", "code": code }] },
            "valueQuantity": { "value": value, "unit": unit }
        })
    }

    fn hemogram(id: &str, subject: &str, components: Vec<Value>) -> Value {
        json!({
            "resourceType": "Observation",
            "id": id,
            "status": "final",
            "code": { "coding": [{ "system": "http://loinc.org", "code": "58410-2" }] },
            "subject": { "reference": format!("Patient/{}", subject) },
            "effectiveDateTime": "2024-03-01T10:00:00Z",
            "component": components
        })
    }

    fn bundle(resources: Vec<Value>) -> Vec<u8> {
        json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": resources.into_iter().map(|r| json!({ "resource": r })).collect::<Vec<_>>()
        })
        .to_string()
        .into_bytes()
    }

    fn setup() -> (Pipeline, Arc<InMemoryBroker>) {
        setup_with(PipelineConfig::default())
    }

    fn setup_with(config: PipelineConfig) -> (Pipeline, Arc<InMemoryBroker>) {
        let broker = Arc::new(InMemoryBroker::new(BrokerConfig::default()));
        let directory = Arc::new(InMemorySubjectDirectory::new());
        directory.insert(
            "p-1",
            Demographics {
                region: Some("north".into()),
                state: Some("AM".into()),
                age: Some(40),
                sex: Some("F".into()),
            },
        );
        let pipeline = Pipeline::new(&config, broker.clone(), directory);
        (pipeline, broker)
    }

    fn events(broker: &InMemoryBroker) -> Vec<message_bus::NotificationEvent> {
        let mut out = Vec::new();
        for p in 0..broker.partition_count() {
            let mut offset = 0;
            while let Some(envelope) = broker.fetch(p, offset) {
                out.push(envelope.event);
                offset += 1;
            }
        }
        out
    }

    #[test]
    fn test_ingest_classifies_stores_and_notifies() {
        let (pipeline, broker) = setup();
        let payload = bundle(vec![
            hemogram(
                "risk",
                "p-1",
                vec![
                    component("6690-2", 3000.0, "/uL"),
                    component("718-7", 9.0, "g/dL"),
                ],
            ),
            hemogram("healthy", "p-2", vec![component("6690-2", 7000.0, "/uL")]),
            json!({ "resourceType": "Patient", "id": "p-1" }),
        ]);

        let report = pipeline.ingest(&payload).unwrap();
        assert_eq!(
            report,
            IngestReport {
                accepted: 2,
                aged_out: 0,
                rejected: 0,
                skipped: 1,
                at_risk: 1
            }
        );

        let stored = pipeline.store().get("risk").unwrap();
        assert!(stored.risk_flag());
        assert_eq!(stored.value(MeasurementKind::Hemoglobin), Some(9.0));
        assert_eq!(pipeline.store().list_at_risk(None).len(), 1);

        let events = events(&broker);
        let risk = events
            .iter()
            .find(|e| e.kind == NotificationKind::RiskDetected)
            .unwrap();
        assert_eq!(risk.reason, "leukopenia (<4000); anemia (<11 g/dL)");
        assert_eq!(risk.region.as_deref(), Some("north"));
        assert_eq!(risk.demographic_bucket.as_deref(), Some("30-44"));

        let stats = events
            .iter()
            .find(|e| e.kind == NotificationKind::StatsUpdated)
            .unwrap();
        assert_eq!(stats.reason, "Total cases: 1");

        let batch = events
            .iter()
            .find(|e| e.kind == NotificationKind::BatchProcessed)
            .unwrap();
        assert_eq!(batch.reason, "Processed: 2 | At risk: 1");
    }

    #[test]
    fn test_malformed_payload_rejected_whole() {
        let (pipeline, broker) = setup();

        assert!(matches!(
            pipeline.ingest(b"{not json"),
            Err(IngestError::Parse(ParseError::MalformedJson(_)))
        ));
        assert!(pipeline.store().is_empty());
        assert_eq!(broker.pending(), 0);
    }

    #[test]
    fn test_empty_bundle_publishes_nothing() {
        let (pipeline, broker) = setup();

        let report = pipeline.ingest(&bundle(vec![])).unwrap();
        assert_eq!(report, IngestReport::default());
        assert_eq!(broker.pending(), 0);
    }

    #[test]
    fn test_publish_failure_does_not_fail_ingest() {
        let (pipeline, broker) = setup();
        broker.close();

        let payload = bundle(vec![hemogram(
            "risk",
            "p-1",
            vec![component("718-7", 8.0, "g/dL")],
        )]);
        let report = pipeline.ingest(&payload).unwrap();

        assert_eq!(report.at_risk, 1);
        assert!(pipeline.store().get("risk").is_some());
    }

    #[test]
    fn test_stats_counted_from_store_on_reingest() {
        let (pipeline, broker) = setup();
        let payload = bundle(vec![hemogram(
            "risk",
            "p-1",
            vec![component("718-7", 9.0, "g/dL")],
        )]);

        for _ in 0..3 {
            pipeline.ingest(&payload).unwrap();
        }

        let totals: Vec<String> = events(&broker)
            .into_iter()
            .filter(|e| e.kind == NotificationKind::StatsUpdated)
            .map(|e| e.reason)
            .collect();
        assert_eq!(totals, ["Total cases: 1"; 3]);
        assert_eq!(pipeline.store().stats().at_risk_count, 1);
    }

    #[test]
    fn test_panel_older_than_full_store_reported_aged_out() {
        let mut config = PipelineConfig::default();
        config.store.capacity = 1;
        let (pipeline, broker) = setup_with(config);

        let mut newer = hemogram("newer", "p-2", vec![component("6690-2", 7000.0, "/uL")]);
        newer["effectiveDateTime"] = json!("2024-04-01T10:00:00Z");
        pipeline.ingest(&bundle(vec![newer])).unwrap();

        let older = hemogram("older", "p-1", vec![component("718-7", 9.0, "g/dL")]);
        let report = pipeline.ingest(&bundle(vec![older])).unwrap();

        assert_eq!(report.accepted, 0);
        assert_eq!(report.aged_out, 1);
        assert_eq!(report.at_risk, 1);
        assert!(pipeline.store().get("older").is_none());
        assert!(pipeline.store().get("newer").is_some());

        let batches: Vec<String> = events(&broker)
            .into_iter()
            .filter(|e| e.kind == NotificationKind::BatchProcessed)
            .map(|e| e.reason)
            .collect();
        assert_eq!(batches, ["Processed: 1 | At risk: 0", "Processed: 1 | At risk: 1"]);
    }
}
