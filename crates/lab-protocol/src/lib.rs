//! Lab Panel Protocol
//!
//! This crate decodes FHIR R4 hemogram observations (single resources or
//! bundles) into typed lab panels with a fixed set of LOINC-mapped measurements.

mod error;
mod measurement;
mod panel;
mod parser;

pub use error::ParseError;
pub use measurement::{Measurement, MeasurementKind, Measurements};
pub use panel::Panel;
pub use parser::{PanelParser, ParseOutcome, DEFAULT_MAX_PAYLOAD_BYTES};
