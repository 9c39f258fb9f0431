//! Risk candidate schema shared by the heuristic and model-backed generators

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured-output envelope requested from the external model
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedRiskCandidates {
    #[serde(default)]
    pub risks: Vec<RiskCandidate>,
}

/// A proposed risk before it is scored, linked and persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RiskCandidate {
    /// Short risk name, e.g. "Ransomware Campaign Expansion"
    pub name: String,
    pub taxonomy_category: String,
    #[serde(default)]
    pub threat_actor: Option<String>,
    #[serde(default, alias = "affected_sector")]
    pub affected_sectors: Vec<String>,
    #[serde(default)]
    pub affected_assets: Vec<String>,
    #[serde(default)]
    pub summary: String,
    pub business_impact: String,
    pub why_care: String,
    pub time_horizon: String,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    /// Extraction confidence in [0, 1]
    pub confidence: f64,
    /// Factual statements from the text, later linked to evidence
    #[serde(default)]
    pub claims: Vec<String>,
}

impl RiskCandidate {
    /// Confidence clamped to [0, 1]
    pub fn bounded_confidence(&self) -> f64 {
        if self.confidence.is_nan() {
            return 0.0;
        }
        self.confidence.clamp(0.0, 1.0)
    }
}
