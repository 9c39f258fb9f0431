//! FAIR-lite composite scoring
//!
//! Four qualitative factors in [1, 5] collapse into a composite in [20, 100]:
//! `20 × (0.30·tef + 0.25·vulnerability + 0.30·primary_loss + 0.15·secondary_loss)`.

use crate::model::SeverityBand;

const TEF_WEIGHT: f64 = 0.30;
const VULNERABILITY_WEIGHT: f64 = 0.25;
const PRIMARY_LOSS_WEIGHT: f64 = 0.30;
const SECONDARY_LOSS_WEIGHT: f64 = 0.15;
const MULTIPLIER: f64 = 20.0;

const MODERATE_CUTOFF: f64 = 40.0;
const HIGH_CUTOFF: f64 = 60.0;
const CRITICAL_CUTOFF: f64 = 80.0;

/// Names containing these raise threat-event frequency
const ESCALATION_KEYWORDS: &[&str] = &["ransomware", "phishing", "compromise"];
/// Names containing these raise primary loss
const HIGH_IMPACT_KEYWORDS: &[&str] = &["ransomware", "supply", "outage"];
const HIGH_CONFIDENCE: f64 = 0.8;

pub fn clamp_factor(value: i32) -> i32 {
    value.clamp(1, 5)
}

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub fn calculate_composite_score(
    tef: i32,
    vulnerability: i32,
    primary_loss: i32,
    secondary_loss: i32,
) -> f64 {
    let weighted = TEF_WEIGHT * f64::from(clamp_factor(tef))
        + VULNERABILITY_WEIGHT * f64::from(clamp_factor(vulnerability))
        + PRIMARY_LOSS_WEIGHT * f64::from(clamp_factor(primary_loss))
        + SECONDARY_LOSS_WEIGHT * f64::from(clamp_factor(secondary_loss));

    round_to(MULTIPLIER * weighted, 2)
}

/// Bands are inclusive on their low edge
pub fn severity_band(score: f64) -> SeverityBand {
    if score < MODERATE_CUTOFF {
        SeverityBand::Low
    } else if score < HIGH_CUTOFF {
        SeverityBand::Moderate
    } else if score < CRITICAL_CUTOFF {
        SeverityBand::High
    } else {
        SeverityBand::Critical
    }
}

/// The four clamped factors for one risk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FairFactors {
    pub tef: i32,
    pub vulnerability: i32,
    pub primary_loss: i32,
    pub secondary_loss: i32,
}

impl FairFactors {
    /// Rule table over the candidate name and extraction confidence
    pub fn derive(name: &str, confidence: f64) -> Self {
        let name = name.to_lowercase();
        let mentions = |keywords: &[&str]| keywords.iter().any(|k| name.contains(k));

        Self {
            tef: if mentions(ESCALATION_KEYWORDS) { 4 } else { 3 },
            vulnerability: if confidence >= HIGH_CONFIDENCE { 4 } else { 3 },
            primary_loss: if mentions(HIGH_IMPACT_KEYWORDS) { 4 } else { 3 },
            secondary_loss: 3,
        }
    }

    pub fn composite(&self) -> f64 {
        calculate_composite_score(
            self.tef,
            self.vulnerability,
            self.primary_loss,
            self.secondary_loss,
        )
    }
}
