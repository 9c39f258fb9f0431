//! Shared LLM client
//!
//! Wraps the OpenAI provider together with the model name used for
//! structured extraction.

use rig::providers::openai;

#[derive(Clone)]
pub struct LlmClient {
    client: openai::Client,
    model: String,
}

impl LlmClient {
    /// Create a new LLM client with the provided API key
    pub fn new(api_key: &str, model: impl Into<String>) -> Result<Self, String> {
        let client = openai::Client::new(api_key)
            .map_err(|e| format!("Failed to create OpenAI client: {}", e))?;

        Ok(Self {
            client,
            model: model.into(),
        })
    }

    /// Underlying OpenAI client, used to build extractors
    pub fn openai_client(&self) -> &openai::Client {
        &self.client
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}
