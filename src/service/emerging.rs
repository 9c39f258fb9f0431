//! Emerging-signal detection
//!
//! Compares a recent mention window against a baseline window for one risk
//! name. The trend ratio measures volume acceleration (recent mentions over a
//! quarter of the baseline), novelty measures how much the sector and
//! actor:technique mix moved. A signal triggers only when volume, novelty,
//! source diversity and extraction confidence all clear fixed thresholds.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::scoring::round_to;

pub const TREND_RATIO_THRESHOLD: f64 = 1.8;
pub const NOVELTY_THRESHOLD: f64 = 0.35;
pub const SOURCE_DIVERSITY_THRESHOLD: i32 = 3;
pub const CONFIDENCE_THRESHOLD: f64 = 0.70;

const AUTO_TRIGGERED_REASON: &str = "auto-triggered by trend+novelty";
const UNKNOWN_ACTOR: &str = "unknown";

/// Aggregated window statistics for one candidate name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmergingInputs {
    pub recent_mentions: usize,
    pub baseline_mentions: usize,
    pub recent_sectors: Vec<String>,
    pub baseline_sectors: Vec<String>,
    pub recent_actor_techniques: Vec<String>,
    pub baseline_actor_techniques: Vec<String>,
    /// Distinct publishers in the recent window
    pub source_diversity: i32,
    pub confidence: f64,
}

/// One prior (or current) occurrence of a risk name
#[derive(Debug, Clone, PartialEq)]
pub struct MentionRecord {
    pub sectors: Vec<String>,
    pub threat_actor: Option<String>,
    pub taxonomy_category: String,
    pub publisher: Option<String>,
}

impl MentionRecord {
    /// `actor:category`, with a placeholder when no actor is known
    pub fn actor_technique(&self) -> String {
        format!(
            "{}:{}",
            self.threat_actor.as_deref().unwrap_or(UNKNOWN_ACTOR),
            self.taxonomy_category
        )
    }
}

impl EmergingInputs {
    pub fn from_mentions(
        recent: &[MentionRecord],
        baseline: &[MentionRecord],
        confidence: f64,
    ) -> Self {
        let publishers: HashSet<&str> = recent
            .iter()
            .filter_map(|m| m.publisher.as_deref())
            .filter(|p| !p.is_empty())
            .collect();

        Self {
            recent_mentions: recent.len(),
            baseline_mentions: baseline.len(),
            recent_sectors: recent.iter().flat_map(|m| m.sectors.clone()).collect(),
            baseline_sectors: baseline.iter().flat_map(|m| m.sectors.clone()).collect(),
            recent_actor_techniques: recent.iter().map(MentionRecord::actor_technique).collect(),
            baseline_actor_techniques: baseline
                .iter()
                .map(MentionRecord::actor_technique)
                .collect(),
            source_diversity: i32::try_from(publishers.len()).unwrap_or(i32::MAX),
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmergingEvaluation {
    pub trend_ratio: f64,
    pub novelty_score: f64,
    pub source_diversity: i32,
    pub triggered: bool,
    pub trigger_reason: String,
}

pub fn compute_trend_ratio(recent_mentions: usize, baseline_mentions: usize) -> f64 {
    let denominator = (baseline_mentions as f64 / 4.0).max(1.0);
    round_to(recent_mentions as f64 / denominator, 4)
}

fn frequencies(items: &[String]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for item in items {
        *counts.entry(item.as_str()).or_insert(0) += 1;
    }
    counts
}

/// How far the recent distribution moved away from the baseline, in [0, 1]
pub fn distribution_shift(recent: &[String], baseline: &[String]) -> f64 {
    if recent.is_empty() {
        return 0.0;
    }
    if baseline.is_empty() {
        return 1.0;
    }

    let recent_counts = frequencies(recent);
    let baseline_counts = frequencies(baseline);

    let new_items = recent_counts
        .keys()
        .filter(|k| !baseline_counts.contains_key(*k))
        .count();
    let new_ratio = new_items as f64 / recent_counts.len() as f64;

    // sorted so the float sum is order-independent
    let overlap: BTreeSet<&str> = recent_counts
        .keys()
        .filter(|k| baseline_counts.contains_key(*k))
        .copied()
        .collect();

    let overlap_shift = if overlap.is_empty() {
        1.0
    } else {
        let total_recent = recent.len() as f64;
        let total_baseline = baseline.len() as f64;
        let sum: f64 = overlap
            .iter()
            .map(|k| {
                let r = recent_counts[k] as f64 / total_recent;
                let b = baseline_counts[k] as f64 / total_baseline;
                (r - b).abs()
            })
            .sum();
        sum / overlap.len() as f64
    };

    round_to((0.6 * new_ratio + 0.4 * overlap_shift).clamp(0.0, 1.0), 4)
}

pub fn compute_novelty_score(
    recent_sectors: &[String],
    baseline_sectors: &[String],
    recent_actor_techniques: &[String],
    baseline_actor_techniques: &[String],
) -> f64 {
    let sector_shift = distribution_shift(recent_sectors, baseline_sectors);
    let actor_shift = distribution_shift(recent_actor_techniques, baseline_actor_techniques);
    round_to(0.5 * sector_shift + 0.5 * actor_shift, 4)
}

pub fn evaluate_emerging(inputs: &EmergingInputs) -> EmergingEvaluation {
    let trend_ratio = compute_trend_ratio(inputs.recent_mentions, inputs.baseline_mentions);
    let novelty_score = compute_novelty_score(
        &inputs.recent_sectors,
        &inputs.baseline_sectors,
        &inputs.recent_actor_techniques,
        &inputs.baseline_actor_techniques,
    );

    let checks = [
        ("trend_ratio>=1.8", trend_ratio >= TREND_RATIO_THRESHOLD),
        ("novelty_score>=0.35", novelty_score >= NOVELTY_THRESHOLD),
        ("source_diversity>=3", inputs.source_diversity >= SOURCE_DIVERSITY_THRESHOLD),
        ("confidence>=0.70", inputs.confidence >= CONFIDENCE_THRESHOLD),
    ];

    let failed: Vec<&str> = checks
        .iter()
        .filter(|(_, passed)| !passed)
        .map(|(name, _)| *name)
        .collect();
    let triggered = failed.is_empty();

    let trigger_reason = if triggered {
        AUTO_TRIGGERED_REASON.to_string()
    } else {
        format!("not-triggered: {}", failed.join(", "))
    };

    EmergingEvaluation {
        trend_ratio,
        novelty_score,
        source_diversity: inputs.source_diversity,
        triggered,
        trigger_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn surge_inputs(confidence: f64) -> EmergingInputs {
        EmergingInputs {
            recent_mentions: 20,
            baseline_mentions: 16,
            recent_sectors: strings(&["Health", "Energy", "Retail"]),
            baseline_sectors: strings(&["Finance", "Finance", "Finance"]),
            recent_actor_techniques: strings(&["LOCKBIT:Ransomware", "CLOP:Ransomware"]),
            baseline_actor_techniques: strings(&["unknown:Ransomware"]),
            source_diversity: 4,
            confidence,
        }
    }

    #[test]
    fn test_surge_with_new_sectors_triggers() {
        let result = evaluate_emerging(&surge_inputs(0.9));

        assert_eq!(result.trend_ratio, 5.0);
        assert_eq!(result.novelty_score, 1.0);
        assert!(result.triggered);
        assert_eq!(result.trigger_reason, "auto-triggered by trend+novelty");
    }

    #[test]
    fn test_low_confidence_blocks_trigger() {
        let result = evaluate_emerging(&surge_inputs(0.5));

        assert!(!result.triggered);
        assert_eq!(result.trigger_reason, "not-triggered: confidence>=0.70");
    }

    #[test]
    fn test_reason_lists_every_failed_check_in_order() {
        let result = evaluate_emerging(&EmergingInputs {
            recent_mentions: 1,
            confidence: 0.9,
            ..Default::default()
        });

        assert_eq!(
            result.trigger_reason,
            "not-triggered: trend_ratio>=1.8, novelty_score>=0.35, source_diversity>=3"
        );
    }

    #[test]
    fn test_trend_ratio_floor_on_small_baseline() {
        assert_eq!(compute_trend_ratio(3, 0), 3.0);
        assert_eq!(compute_trend_ratio(3, 2), 3.0);
        assert_eq!(compute_trend_ratio(2, 12), 0.6667);
        assert_eq!(compute_trend_ratio(0, 40), 0.0);
    }

    #[test]
    fn test_distribution_shift_edges() {
        assert_eq!(distribution_shift(&[], &strings(&["a"])), 0.0);
        assert_eq!(distribution_shift(&strings(&["a"]), &[]), 1.0);
        assert_eq!(distribution_shift(&strings(&["a", "b"]), &strings(&["a", "b"])), 0.0);
    }

    #[test]
    fn test_distribution_shift_partial_overlap() {
        // new_ratio = 1/2; overlap {a}: |1/2 - 1/1| = 0.5 -> 0.6*0.5 + 0.4*0.5
        let shift = distribution_shift(&strings(&["a", "b"]), &strings(&["a"]));
        assert_eq!(shift, 0.5);
    }

    #[test]
    fn test_from_mentions_aggregates_windows() {
        let mention = |actor: Option<&str>, publisher: Option<&str>, sector: &str| MentionRecord {
            sectors: vec![sector.to_string()],
            threat_actor: actor.map(String::from),
            taxonomy_category: "Ransomware".to_string(),
            publisher: publisher.map(String::from),
        };
        let recent = vec![
            mention(Some("LOCKBIT"), Some("a.example"), "Health"),
            mention(None, Some("b.example"), "Health"),
            mention(None, Some("a.example"), "Energy"),
            mention(None, None, "Energy"),
        ];
        let baseline = vec![mention(None, Some("c.example"), "Finance")];

        let inputs = EmergingInputs::from_mentions(&recent, &baseline, 0.72);

        assert_eq!(inputs.recent_mentions, 4);
        assert_eq!(inputs.baseline_mentions, 1);
        assert_eq!(inputs.source_diversity, 2);
        assert_eq!(inputs.recent_sectors.len(), 4);
        assert_eq!(inputs.recent_actor_techniques[0], "LOCKBIT:Ransomware");
        assert_eq!(inputs.baseline_actor_techniques, vec!["unknown:Ransomware"]);
    }
}
