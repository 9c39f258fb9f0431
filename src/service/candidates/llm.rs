//! Model-backed candidate strategy with heuristic fallback

use async_trait::async_trait;

use super::prompts::{CANDIDATE_SYSTEM_PROMPT, build_candidate_prompt};
use super::{CandidateError, CandidateStrategy, HeuristicStrategy};
use crate::model::{ExtractedRiskCandidates, RiskCandidate};
use crate::service::LlmClient;

/// Structured-output call returning the candidate schema
#[async_trait]
pub trait CandidateModel: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractedRiskCandidates, CandidateError>;
}

pub struct OpenAiCandidateModel {
    llm_client: LlmClient,
}

impl OpenAiCandidateModel {
    pub fn new(llm_client: LlmClient) -> Self {
        Self { llm_client }
    }
}

#[async_trait]
impl CandidateModel for OpenAiCandidateModel {
    async fn extract(&self, text: &str) -> Result<ExtractedRiskCandidates, CandidateError> {
        let model = self.llm_client.model();
        let prompt = build_candidate_prompt(text);
        let prompt_length = prompt.len();

        tracing::debug!(
            model = %model,
            prompt_length = prompt_length,
            "Initiating OpenAI API call for risk candidates"
        );

        let start_time = std::time::Instant::now();

        let extractor = self
            .llm_client
            .openai_client()
            .extractor::<ExtractedRiskCandidates>(model)
            .preamble(CANDIDATE_SYSTEM_PROMPT)
            .additional_params(serde_json::json!({
                "temperature": 0.1,
                "max_tokens": 1800
            }))
            .build();

        match extractor.extract(&prompt).await {
            Ok(result) => {
                tracing::info!(
                    model = %model,
                    elapsed_ms = start_time.elapsed().as_millis(),
                    risks_extracted = result.risks.len(),
                    prompt_length = prompt_length,
                    "OpenAI API call completed successfully"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(
                    model = %model,
                    elapsed_ms = start_time.elapsed().as_millis(),
                    prompt_length = prompt_length,
                    error = %e,
                    "OpenAI API call failed"
                );
                Err(CandidateError::RequestFailed(e.to_string()))
            }
        }
    }
}

/// Wraps a [`CandidateModel`]; any error or empty answer yields the heuristic result
pub struct ExternalCandidateStrategy<M> {
    model: M,
    fallback: HeuristicStrategy,
}

impl<M: CandidateModel> ExternalCandidateStrategy<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            fallback: HeuristicStrategy,
        }
    }

    async fn try_generate(&self, text: &str) -> Result<Vec<RiskCandidate>, CandidateError> {
        let extracted = self.model.extract(text).await?;
        let risks: Vec<RiskCandidate> = extracted
            .risks
            .into_iter()
            .filter(|r| !r.name.trim().is_empty())
            .collect();
        if risks.is_empty() {
            return Err(CandidateError::EmptyResult);
        }
        Ok(risks)
    }
}

#[async_trait]
impl<M: CandidateModel> CandidateStrategy for ExternalCandidateStrategy<M> {
    fn name(&self) -> &'static str {
        "external_model"
    }

    async fn generate(&self, text: &str) -> Vec<RiskCandidate> {
        match self.try_generate(text).await {
            Ok(risks) => risks,
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to heuristic candidates");
                self.fallback.candidates(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingModel;

    #[async_trait]
    impl CandidateModel for FailingModel {
        async fn extract(&self, _text: &str) -> Result<ExtractedRiskCandidates, CandidateError> {
            Err(CandidateError::RequestFailed("connection reset".to_string()))
        }
    }

    struct CannedModel(ExtractedRiskCandidates);

    #[async_trait]
    impl CandidateModel for CannedModel {
        async fn extract(&self, _text: &str) -> Result<ExtractedRiskCandidates, CandidateError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_model_error_falls_back_to_heuristic() {
        let strategy = ExternalCandidateStrategy::new(FailingModel);
        let candidates = strategy.generate("a phishing wave").await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "Credential Theft via Phishing");
    }

    #[tokio::test]
    async fn test_empty_model_result_falls_back_to_heuristic() {
        let strategy = ExternalCandidateStrategy::new(CannedModel(ExtractedRiskCandidates::default()));
        let candidates = strategy.generate("nothing notable").await;
        assert_eq!(candidates[0].name, "General Cyber Threat Escalation");
    }

    #[tokio::test]
    async fn test_model_candidates_pass_through() {
        let json = serde_json::json!({
            "risks": [{
                "name": "Edge Device Exploitation",
                "taxonomy_category": "Initial Access",
                "threat_actor": "SANDWORM",
                "affected_sector": ["Energy"],
                "affected_assets": ["VPN appliances"],
                "business_impact": "Grid operations could be disrupted.",
                "why_care": "Operational outages carry safety and regulatory cost.",
                "time_horizon": "0-30 days",
                "recommended_actions": ["Patch VPN appliances"],
                "confidence": 0.81,
                "claims": ["Sandworm exploited VPN appliances at energy utilities"]
            }]
        });
        let canned: ExtractedRiskCandidates = serde_json::from_value(json).unwrap();
        let strategy = ExternalCandidateStrategy::new(CannedModel(canned));

        let candidates = strategy.generate("irrelevant").await;

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "Edge Device Exploitation");
        assert_eq!(candidates[0].affected_sectors, vec!["Energy"]);
        assert_eq!(candidates[0].summary, "");
    }
}
