//! Threshold Rules

use lab_protocol::{MeasurementKind, Panel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Rule thresholds (all exclusive: a value must be strictly below to match)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    /// Leukocyte count (/µL) (default: 4000)
    pub leukocytes: f64,
    /// Lymphocyte percentage (default: 20)
    pub lymphocytes_pct: f64,
    /// Hemoglobin (g/dL) (default: 11.0)
    pub hemoglobin: f64,
    /// Absolute lymphocyte count (/µL) (default: 1000)
    pub lymphocytes_abs: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            leukocytes: 4000.0,
            lymphocytes_pct: 20.0,
            hemoglobin: 11.0,
            lymphocytes_abs: 1000.0,
        }
    }
}

/// Risk rules, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskRule {
    Leukopenia,
    LymphopeniaPercent,
    Anemia,
    LymphopeniaAbsolute,
}

impl RiskRule {
    /// All rules in the fixed evaluation order
    pub const ORDER: [RiskRule; 4] = [
        RiskRule::Leukopenia,
        RiskRule::LymphopeniaPercent,
        RiskRule::Anemia,
        RiskRule::LymphopeniaAbsolute,
    ];

    /// Measurement the rule reads
    pub fn measurement(&self) -> MeasurementKind {
        match self {
            RiskRule::Leukopenia => MeasurementKind::Leukocytes,
            RiskRule::LymphopeniaPercent => MeasurementKind::Lymphocytes,
            RiskRule::Anemia => MeasurementKind::Hemoglobin,
            RiskRule::LymphopeniaAbsolute => MeasurementKind::LymphocytesAbs,
        }
    }

    /// Human-readable reason reported when the rule matches, naming the
    /// active threshold
    pub fn reason(&self, thresholds: &RiskThresholds) -> String {
        let limit = self.threshold(thresholds);
        match self {
            RiskRule::Leukopenia => format!("leukopenia (<{})", limit),
            RiskRule::LymphopeniaPercent if limit == RiskThresholds::default().lymphocytes_pct => {
                "lymphopenia (%)".to_string()
            }
            RiskRule::LymphopeniaPercent => format!("lymphopenia (<{}%)", limit),
            RiskRule::Anemia => format!("anemia (<{} g/dL)", limit),
            RiskRule::LymphopeniaAbsolute => format!("lymphopenia (absolute, <{})", limit),
        }
    }

    fn threshold(&self, thresholds: &RiskThresholds) -> f64 {
        match self {
            RiskRule::Leukopenia => thresholds.leukocytes,
            RiskRule::LymphopeniaPercent => thresholds.lymphocytes_pct,
            RiskRule::Anemia => thresholds.hemoglobin,
            RiskRule::LymphopeniaAbsolute => thresholds.lymphocytes_abs,
        }
    }

    /// Whether the rule matches a panel. Absent measurements never match.
    pub fn matches(&self, panel: &Panel, thresholds: &RiskThresholds) -> bool {
        panel
            .value(self.measurement())
            .is_some_and(|value| value < self.threshold(thresholds))
    }
}

/// Pure, deterministic panel classifier
#[derive(Debug, Clone, Default)]
pub struct RiskClassifier {
    thresholds: RiskThresholds,
}

impl RiskClassifier {
    /// Create a classifier with the given thresholds
    pub fn new(thresholds: RiskThresholds) -> Self {
        info!("Creating risk classifier with thresholds: {:?}", thresholds);
        Self { thresholds }
    }

    /// Get the active thresholds
    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// Evaluate every rule and collect reasons, without short-circuiting
    pub fn assess(&self, panel: &Panel) -> Vec<String> {
        RiskRule::ORDER
            .iter()
            .filter(|rule| rule.matches(panel, &self.thresholds))
            .map(|rule| rule.reason(&self.thresholds))
            .collect()
    }

    /// Classify a panel, returning it with its risk flag and reasons set
    pub fn classify(&self, panel: Panel) -> Panel {
        let reasons = self.assess(&panel);
        if !reasons.is_empty() {
            debug!("Panel {} at risk: {}", panel.id, reasons.join(", "));
        }
        panel.with_assessment(reasons)
    }
}
