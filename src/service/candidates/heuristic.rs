//! Keyword heuristics that always produce exactly one candidate

use std::collections::BTreeSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::CandidateStrategy;
use crate::extractor::truncate_chars;
use crate::model::RiskCandidate;

pub const DEFAULT_ACTIONS: [&str; 3] = [
    "Harden exposed internet-facing services and enforce MFA",
    "Review and patch vulnerable assets referenced by this threat pattern",
    "Run tabletop incident scenario for affected business process",
];

const DEFAULT_TAXONOMY: &str = "Cyber Threat";
const DEFAULT_NAME: &str = "General Cyber Threat Escalation";
const DEFAULT_SECTOR: &str = "Cross-Sector";
const DEFAULT_ASSET: &str = "Core business applications";
const GENERIC_CLAIM: &str = "Threat activity is increasing and impacting business operations.";
const BUSINESS_IMPACT: &str = "Potential downtime, service disruption, and unplanned recovery costs.";
const WHY_CARE: &str =
    "This threat can interrupt revenue-generating operations and increase regulatory exposure.";
const TIME_HORIZON: &str = "0-90 days";
const HEURISTIC_CONFIDENCE: f64 = 0.72;

const MIN_CLAIM_CHARS: usize = 40;
const MAX_CLAIMS: usize = 4;
const MAX_SUMMARY_CHARS: usize = 240;

/// Keyword, taxonomy, name, implied assets; later matches override the
/// taxonomy and name, assets accumulate
const THEMES: &[(&str, &str, &str, &[&str])] = &[
    (
        "ransomware",
        "Ransomware",
        "Ransomware Campaign Expansion",
        &["Endpoints", "File servers", "Backup systems"],
    ),
    (
        "phishing",
        "Phishing",
        "Credential Theft via Phishing",
        &["Identity providers", "Email infrastructure"],
    ),
    (
        "supply chain",
        "Supply Chain",
        "Third-Party Software Supply Chain Compromise",
        &["Build systems", "Software repositories"],
    ),
];

const SECTORS: &[&str] = &[
    "finance",
    "health",
    "energy",
    "retail",
    "government",
    "manufacturing",
];

static ACTOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(apt\s*\d+|lazarus|lockbit|clop|sandworm)\b").expect("valid actor regex")
});

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicStrategy;

impl HeuristicStrategy {
    pub fn candidates(&self, text: &str) -> Vec<RiskCandidate> {
        let lower = text.to_lowercase();

        let mut taxonomy = DEFAULT_TAXONOMY;
        let mut name = DEFAULT_NAME;
        let mut assets = BTreeSet::new();
        for (keyword, theme_taxonomy, theme_name, theme_assets) in THEMES {
            if lower.contains(*keyword) {
                taxonomy = *theme_taxonomy;
                name = *theme_name;
                assets.extend(theme_assets.iter().map(|a| a.to_string()));
            }
        }
        if assets.is_empty() {
            assets.insert(DEFAULT_ASSET.to_string());
        }

        let mut sectors: BTreeSet<String> = SECTORS
            .iter()
            .filter(|s| lower.contains(**s))
            .map(|s| title_case(s))
            .collect();
        if sectors.is_empty() {
            sectors.insert(DEFAULT_SECTOR.to_string());
        }

        let threat_actor = ACTOR_RE
            .captures(&lower)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_uppercase());

        let claims = extract_claims(text);
        let summary = truncate_chars(&claims[0], MAX_SUMMARY_CHARS).to_string();

        vec![RiskCandidate {
            name: name.to_string(),
            taxonomy_category: taxonomy.to_string(),
            threat_actor,
            affected_sectors: sectors.into_iter().collect(),
            affected_assets: assets.into_iter().collect(),
            summary,
            business_impact: BUSINESS_IMPACT.to_string(),
            why_care: WHY_CARE.to_string(),
            time_horizon: TIME_HORIZON.to_string(),
            recommended_actions: DEFAULT_ACTIONS.iter().map(|a| a.to_string()).collect(),
            confidence: HEURISTIC_CONFIDENCE,
            claims,
        }]
    }
}

#[async_trait]
impl CandidateStrategy for HeuristicStrategy {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn generate(&self, text: &str) -> Vec<RiskCandidate> {
        self.candidates(text)
    }
}

/// First sentence-like segments long enough to carry a claim; never empty
fn extract_claims(text: &str) -> Vec<String> {
    let claims: Vec<String> = text
        .split('.')
        .map(str::trim)
        .filter(|segment| segment.chars().count() > MIN_CLAIM_CHARS)
        .take(MAX_CLAIMS)
        .map(String::from)
        .collect();

    if claims.is_empty() {
        vec![GENERIC_CLAIM.to_string()]
    } else {
        claims
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_text_uses_defaults() {
        let candidates = HeuristicStrategy.candidates("generic threat activity");

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.name, "General Cyber Threat Escalation");
        assert_eq!(c.taxonomy_category, "Cyber Threat");
        assert_eq!(c.affected_sectors, vec!["Cross-Sector"]);
        assert_eq!(c.affected_assets, vec!["Core business applications"]);
        assert_eq!(c.threat_actor, None);
        assert_eq!(
            c.claims,
            vec!["Threat activity is increasing and impacting business operations."]
        );
        assert_eq!(c.summary, c.claims[0]);
        assert_eq!(c.confidence, 0.72);
        assert_eq!(c.recommended_actions.len(), 3);
        assert_eq!(c.time_horizon, "0-90 days");
    }

    #[test]
    fn test_ransomware_report() {
        let text = "LockBit affiliates deployed ransomware against regional health networks this spring. \
                    Energy utilities also reported encrypted file shares during the same campaign window.";

        let c = &HeuristicStrategy.candidates(text)[0];

        assert_eq!(c.name, "Ransomware Campaign Expansion");
        assert_eq!(c.taxonomy_category, "Ransomware");
        assert_eq!(c.threat_actor.as_deref(), Some("LOCKBIT"));
        assert_eq!(c.affected_sectors, vec!["Energy", "Health"]);
        assert_eq!(
            c.affected_assets,
            vec!["Backup systems", "Endpoints", "File servers"]
        );
        assert_eq!(c.claims.len(), 2);
        assert!(c.claims[0].starts_with("LockBit affiliates"));
    }

    #[test]
    fn test_later_theme_overrides_name_and_assets_accumulate() {
        let text = "A phishing lure led to a supply chain compromise attributed to APT 29";

        let c = &HeuristicStrategy.candidates(text)[0];

        assert_eq!(c.taxonomy_category, "Supply Chain");
        assert_eq!(c.name, "Third-Party Software Supply Chain Compromise");
        assert_eq!(
            c.affected_assets,
            vec![
                "Build systems",
                "Email infrastructure",
                "Identity providers",
                "Software repositories"
            ]
        );
        assert_eq!(c.threat_actor.as_deref(), Some("APT 29"));
    }

    #[test]
    fn test_claims_capped_at_four() {
        let sentence = "Attackers continue to exploit exposed remote access gateways worldwide";
        let text = vec![sentence; 6].join(". ");

        let c = &HeuristicStrategy.candidates(&text)[0];

        assert_eq!(c.claims.len(), 4);
    }

    #[test]
    fn test_summary_truncated() {
        let long = "x".repeat(400);
        let c = &HeuristicStrategy.candidates(&long)[0];
        assert_eq!(c.summary.chars().count(), 240);
        assert_eq!(c.claims[0].chars().count(), 400);
    }
}
