//! Risk candidate generation
//!
//! Text goes in, a non-empty ordered list of candidates comes out. The
//! heuristic strategy is always available; a model-backed strategy is used
//! instead when one was configured, and it falls back to the heuristic on its
//! own so callers never observe an external failure.

mod heuristic;
mod llm;
mod prompts;

use std::sync::Arc;

use async_trait::async_trait;

pub use heuristic::{DEFAULT_ACTIONS, HeuristicStrategy};
pub use llm::{CandidateModel, ExternalCandidateStrategy, OpenAiCandidateModel};

use crate::model::RiskCandidate;

#[derive(Debug, thiserror::Error)]
pub enum CandidateError {
    #[error("Candidate model request failed: {0}")]
    RequestFailed(String),

    #[error("Candidate model returned no risks")]
    EmptyResult,
}

/// One way of turning normalized text into risk candidates
#[async_trait]
pub trait CandidateStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Never returns an empty list
    async fn generate(&self, text: &str) -> Vec<RiskCandidate>;
}

/// Strategy selection for the orchestrator
#[derive(Clone)]
pub struct CandidateGenerator {
    heuristic: HeuristicStrategy,
    external: Option<Arc<dyn CandidateStrategy>>,
}

impl CandidateGenerator {
    pub fn heuristic_only() -> Self {
        Self {
            heuristic: HeuristicStrategy,
            external: None,
        }
    }

    pub fn with_external(strategy: Arc<dyn CandidateStrategy>) -> Self {
        Self {
            heuristic: HeuristicStrategy,
            external: Some(strategy),
        }
    }

    fn strategy(&self) -> &dyn CandidateStrategy {
        match &self.external {
            Some(external) => external.as_ref(),
            None => &self.heuristic,
        }
    }

    pub async fn generate(&self, text: &str) -> Vec<RiskCandidate> {
        let strategy = self.strategy();
        let candidates = strategy.generate(text).await;
        tracing::info!(
            strategy = strategy.name(),
            candidate_count = candidates.len(),
            "Generated risk candidates"
        );

        if candidates.is_empty() {
            // external strategies are expected to fall back themselves
            tracing::warn!(strategy = strategy.name(), "Strategy returned no candidates");
            return self.heuristic.candidates(text);
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedStrategy(Vec<RiskCandidate>);

    #[async_trait]
    impl CandidateStrategy for FixedStrategy {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn generate(&self, _text: &str) -> Vec<RiskCandidate> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_heuristic_only_generator() {
        let generator = CandidateGenerator::heuristic_only();
        let candidates = generator.generate("phishing in retail").await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].taxonomy_category, "Phishing");
    }

    #[tokio::test]
    async fn test_external_strategy_is_preferred() {
        let mut candidate = HeuristicStrategy.candidates("x")[0].clone();
        candidate.name = "Model Risk".to_string();
        let generator =
            CandidateGenerator::with_external(Arc::new(FixedStrategy(vec![candidate])));

        let candidates = generator.generate("ransomware").await;

        assert_eq!(candidates[0].name, "Model Risk");
    }

    #[tokio::test]
    async fn test_misbehaving_external_strategy_still_yields_candidates() {
        let generator = CandidateGenerator::with_external(Arc::new(FixedStrategy(Vec::new())));
        let candidates = generator.generate("ransomware").await;
        assert_eq!(candidates[0].name, "Ransomware Campaign Expansion");
    }
}
