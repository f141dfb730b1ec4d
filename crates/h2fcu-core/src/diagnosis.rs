//! Diagnosis payloads
//!
//! The diagnosis model lives upstream; this crate only carries its verdict
//! to subscribers and sends operator labels back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Fault classes the upstream model distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisLabel {
    /// No anomaly
    #[default]
    Normal,
    /// Water accumulating in the stack
    Flooding,
    /// Membrane losing humidity
    MembraneDrying,
    /// Stack temperature out of range
    ThermalIssue,
}

impl fmt::Display for DiagnosisLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosisLabel::Normal => "normal",
            DiagnosisLabel::Flooding => "flooding",
            DiagnosisLabel::MembraneDrying => "membrane_drying",
            DiagnosisLabel::ThermalIssue => "thermal_issue",
        };
        f.write_str(name)
    }
}

/// Verdict attached to a `machine_state` payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosisResult {
    /// Most likely class
    pub label: DiagnosisLabel,
    /// Localized label text, if the model provides one
    pub label_cn: Option<String>,
    /// 0..100
    pub confidence: f64,
    /// Per-class probability, keyed by label
    pub probabilities: HashMap<String, f64>,
    /// False while the model still runs on defaults
    pub is_trained: bool,
    /// Samples the model has seen
    pub sample_count: u64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_upstream_payload() {
        let json = r#"{
            "label": "membrane_drying",
            "label_cn": "膜干燥",
            "confidence": 82.5,
            "probabilities": {"normal": 0.1, "membrane_drying": 0.825},
            "is_trained": true,
            "sample_count": 12,
            "timestamp": 1700000000000
        }"#;
        let result: DiagnosisResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.label, DiagnosisLabel::MembraneDrying);
        assert!(result.is_trained);
        assert_eq!(result.sample_count, 12);
        assert_eq!(result.probabilities.len(), 2);
    }

    #[test]
    fn test_missing_fields_default() {
        let result: DiagnosisResult = serde_json::from_str(r#"{"label":"flooding"}"#).unwrap();
        assert_eq!(result.label, DiagnosisLabel::Flooding);
        assert_eq!(result.confidence, 0.0);
        assert!(result.label_cn.is_none());
    }
}
