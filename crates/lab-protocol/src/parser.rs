//! FHIR Panel Parser
//!
//! Decodes a FHIR R4 JSON payload (a single `Observation` or a `Bundle` of
//! entries) into hemogram panels.

use crate::error::ParseError;
use crate::measurement::{Measurement, MeasurementKind, Measurements};
use crate::panel::Panel;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Default maximum payload size (1 MiB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1_048_576;

/// Panel-type LOINC codes accepted as hemograms
const PANEL_CODES: [&str; 2] = [
    "58410-2", // CBC panel - Blood by Automated count
    "57021-8", // CBC W Auto Differential panel
];

/// Panel-type display names accepted as hemograms (case-insensitive)
const PANEL_DISPLAYS: [&str; 2] = ["hemograma", "complete blood count"];

#[derive(Debug, Default, Deserialize)]
struct CodeableConcept {
    #[serde(default)]
    coding: Vec<Coding>,
}

#[derive(Debug, Deserialize)]
struct Coding {
    code: Option<String>,
    display: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reference {
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Quantity {
    value: Option<Value>,
    unit: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Component {
    #[serde(default)]
    code: CodeableConcept,
    value_quantity: Option<Quantity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Observation {
    id: Option<String>,
    #[serde(default)]
    code: CodeableConcept,
    subject: Option<Reference>,
    effective_date_time: Option<String>,
    issued: Option<String>,
    #[serde(default)]
    component: Vec<Component>,
}

/// Result of decoding one payload
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Extracted panels, in payload order
    pub panels: Vec<Panel>,
    /// Records that are not hemograms
    pub skipped: usize,
    /// Hemogram records discarded for lacking a usable identifier or shape
    pub rejected: usize,
}

/// Parser for FHIR hemogram payloads
#[derive(Debug, Clone)]
pub struct PanelParser {
    max_payload_bytes: usize,
}

impl PanelParser {
    /// Create a parser with a payload size limit
    pub fn new(max_payload_bytes: usize) -> Self {
        Self { max_payload_bytes }
    }

    /// Get the payload size limit
    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Parse a raw payload into panels
    pub fn parse(&self, raw: &[u8]) -> Result<Vec<Panel>, ParseError> {
        self.parse_detailed(raw).map(|outcome| outcome.panels)
    }

    /// Parse a string payload into panels
    pub fn parse_str(&self, raw: &str) -> Result<Vec<Panel>, ParseError> {
        self.parse(raw.as_bytes())
    }

    /// Parse a raw payload, also reporting skipped and rejected record counts
    pub fn parse_detailed(&self, raw: &[u8]) -> Result<ParseOutcome, ParseError> {
        if raw.len() > self.max_payload_bytes {
            return Err(ParseError::PayloadTooLarge {
                size: raw.len(),
                limit: self.max_payload_bytes,
            });
        }

        let text = std::str::from_utf8(raw)?;
        if text.trim().is_empty() {
            return Err(ParseError::EmptyPayload);
        }

        let root: Value = serde_json::from_str(text)?;
        if !root.is_object() {
            return Err(ParseError::InvalidEnvelope("payload is not a JSON object".to_string()));
        }

        let resource_type = root
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::InvalidEnvelope("missing resourceType".to_string()))?;

        let mut outcome = ParseOutcome::default();

        match resource_type {
            "Bundle" => {
                let entries = match root.get("entry") {
                    None | Some(Value::Null) => &[][..],
                    Some(Value::Array(entries)) => entries.as_slice(),
                    Some(_) => {
                        return Err(ParseError::InvalidEnvelope(
                            "Bundle.entry is not an array".to_string(),
                        ))
                    }
                };
                debug!("Decoding bundle with {} entries", entries.len());

                for entry in entries {
                    match entry.get("resource") {
                        Some(resource) if is_observation(resource) => {
                            self.extract(resource, &mut outcome);
                        }
                        _ => {
                            debug!("Bundle entry skipped: not an Observation");
                            outcome.skipped += 1;
                        }
                    }
                }
            }
            "Observation" => self.extract(&root, &mut outcome),
            other => return Err(ParseError::UnsupportedResource(other.to_string())),
        }

        info!(
            "Parsed payload: {} panel(s), {} skipped, {} rejected",
            outcome.panels.len(),
            outcome.skipped,
            outcome.rejected
        );
        Ok(outcome)
    }

    /// Extract one observation into the outcome
    fn extract(&self, resource: &Value, outcome: &mut ParseOutcome) {
        let observation = match Observation::deserialize(resource) {
            Ok(observation) => observation,
            Err(e) => {
                warn!("Observation rejected: not decodable ({})", e);
                outcome.rejected += 1;
                return;
            }
        };

        if !is_hemogram(&observation.code) {
            debug!("Observation skipped: code/display is not a hemogram panel");
            outcome.skipped += 1;
            return;
        }

        let measurements = extract_measurements(&observation.component);
        let id = observation
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let Some(id) = id else {
            if measurements.is_empty() {
                debug!("Hemogram dropped: no identifier and no measurements");
            } else {
                warn!(
                    "Hemogram rejected: {} measurement(s) but no identifier",
                    measurements.len()
                );
            }
            outcome.rejected += 1;
            return;
        };

        let collected_at = observation
            .effective_date_time
            .as_deref()
            .and_then(parse_fhir_datetime)
            .or_else(|| observation.issued.as_deref().and_then(parse_fhir_datetime));

        let mut panel = Panel::new(id, collected_at).with_measurements(measurements);
        if let Some(subject) = observation
            .subject
            .as_ref()
            .and_then(|s| s.reference.as_deref())
            .and_then(subject_id_from_reference)
        {
            panel = panel.with_subject(subject);
        }

        debug!(
            "Hemogram extracted: id={}, {} measurement(s)",
            panel.id,
            panel.measurements.len()
        );
        outcome.panels.push(panel);
    }
}

impl Default for PanelParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_BYTES)
    }
}

fn is_observation(resource: &Value) -> bool {
    resource.get("resourceType").and_then(Value::as_str) == Some("Observation")
}

fn is_hemogram(code: &CodeableConcept) -> bool {
    code.coding.iter().any(|coding| {
        coding
            .code
            .as_deref()
            .is_some_and(|c| PANEL_CODES.contains(&c))
            || coding.display.as_deref().is_some_and(|d| {
                PANEL_DISPLAYS.iter().any(|known| known.eq_ignore_ascii_case(d.trim()))
            })
    })
}

fn extract_measurements(components: &[Component]) -> Measurements {
    let mut measurements = Measurements::new();

    for component in components {
        let Some(code) = component.code.coding.first().and_then(|c| c.code.as_deref()) else {
            debug!("Component skipped: no code");
            continue;
        };

        let Some(kind) = MeasurementKind::from_loinc(code) else {
            debug!("Component skipped: unmapped code {}", code);
            continue;
        };

        let Some(quantity) = component.value_quantity.as_ref() else {
            debug!("Component {} skipped: no valueQuantity", code);
            continue;
        };

        let Some(value) = quantity.value.as_ref().and_then(numeric_value) else {
            debug!("Component {} skipped: value is not numeric", code);
            continue;
        };

        measurements.set(kind, Measurement::new(value, quantity.unit.as_deref()));
    }

    measurements
}

/// Decode a FHIR decimal, accepting JSON numbers and numeric strings
fn numeric_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Parse a FHIR dateTime (full RFC 3339, local date-time, or date only)
fn parse_fhir_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn subject_id_from_reference(reference: &str) -> Option<String> {
    reference
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
