//! Lab Panel Model

use crate::measurement::{MeasurementKind, Measurements};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One hemogram result set extracted from an external record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Panel {
    /// External identifier (unique within the store window)
    pub id: String,
    /// Subject the sample was collected from, if referenced
    pub subject_id: Option<String>,
    /// Sample collection time
    pub collected_at: Option<DateTime<Utc>>,
    /// Extracted measurements
    pub measurements: Measurements,
    risk_flag: bool,
    risk_reasons: Vec<String>,
}

impl Panel {
    /// Create an unassessed panel
    pub fn new(id: impl Into<String>, collected_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            subject_id: None,
            collected_at,
            measurements: Measurements::new(),
            risk_flag: false,
            risk_reasons: Vec::new(),
        }
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_measurements(mut self, measurements: Measurements) -> Self {
        self.measurements = measurements;
        self
    }

    /// Attach a risk assessment. The flag is derived from the reasons.
    pub fn with_assessment(mut self, reasons: Vec<String>) -> Self {
        self.risk_flag = !reasons.is_empty();
        self.risk_reasons = reasons;
        self
    }

    /// Whether the classifier flagged this panel
    pub fn risk_flag(&self) -> bool {
        self.risk_flag
    }

    /// Reasons in rule order; empty when not at risk
    pub fn risk_reasons(&self) -> &[String] {
        &self.risk_reasons
    }

    /// Shorthand for a measurement value
    pub fn value(&self, kind: MeasurementKind) -> Option<f64> {
        self.measurements.value(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assessment_sets_flag() {
        let panel = Panel::new("obs-1", None).with_assessment(vec!["anemia (<11 g/dL)".to_string()]);
        assert!(panel.risk_flag());
        assert_eq!(panel.risk_reasons().len(), 1);

        let panel = panel.with_assessment(Vec::new());
        assert!(!panel.risk_flag());
        assert!(panel.risk_reasons().is_empty());
    }
}
