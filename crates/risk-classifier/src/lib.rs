//! Risk Classification
//!
//! Explainable threshold rules that flag hemogram panels for follow-up.

mod rules;

pub use rules::{RiskClassifier, RiskRule, RiskThresholds};
