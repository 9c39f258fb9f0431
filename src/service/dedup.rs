//! Content hashing and token-overlap similarity

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9_]+").expect("valid token regex"));

/// SHA-256 hex digest of normalized text, the exact-duplicate key
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Case-folded alphanumeric runs
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn token_counts(text: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
}

/// Multiset overlap divided by the larger token total; 0.0 when either side is empty
pub fn semantic_similarity(a: &str, b: &str) -> f64 {
    let counts_a = token_counts(a);
    let counts_b = token_counts(b);
    if counts_a.is_empty() || counts_b.is_empty() {
        return 0.0;
    }

    let shared: usize = counts_a
        .iter()
        .filter_map(|(token, &ca)| counts_b.get(token).map(|&cb| ca.min(cb)))
        .sum();
    let total_a: usize = counts_a.values().sum();
    let total_b: usize = counts_b.values().sum();

    shared as f64 / total_a.max(total_b) as f64
}

pub fn is_near_duplicate(a: &str, b: &str, threshold: f64) -> bool {
    semantic_similarity(a, b) >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable_sha256() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(content_hash("same text"), content_hash("same text"));
        assert_ne!(content_hash("same text"), content_hash("same text."));
    }

    #[test]
    fn test_tokenize_folds_case_and_drops_punctuation() {
        assert_eq!(
            tokenize("LockBit, APT29 & co_op!"),
            vec!["lockbit", "apt29", "co_op"]
        );
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = "Ransomware crews target hospitals and clinics";
        let b = "Hospitals report ransomware crews again";
        assert_eq!(semantic_similarity(a, b), semantic_similarity(b, a));
    }

    #[test]
    fn test_self_similarity_is_one() {
        let text = "Phishing kits bypass MFA prompts";
        assert_eq!(semantic_similarity(text, text), 1.0);
    }

    #[test]
    fn test_empty_side_scores_zero() {
        assert_eq!(semantic_similarity("", "anything"), 0.0);
        assert_eq!(semantic_similarity("!!!", "anything"), 0.0);
    }

    #[test]
    fn test_repeated_tokens_use_minimum_counts() {
        // overlap min(3,1) = 1, larger total = 3
        let score = semantic_similarity("alert alert alert", "alert");
        assert!((score - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_near_duplicate_paraphrase_vs_unrelated() {
        let original = "The ransomware group encrypted backup servers at regional hospitals";
        let paraphrase = "Regional hospitals saw the ransomware group encrypt their backup servers";
        let unrelated = "Quarterly earnings beat analyst expectations in retail";

        assert!(is_near_duplicate(original, paraphrase, 0.5));
        assert!(!is_near_duplicate(original, unrelated, 0.5));
        assert!(!is_near_duplicate(original, paraphrase, 0.9));
    }
}
