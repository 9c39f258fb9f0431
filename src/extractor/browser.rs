//! Headless-browser rendering through a Browserless `/content` endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::ExtractionError;

/// Produces fully rendered HTML for a page
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &Url) -> Result<String, ExtractionError>;
}

pub struct BrowserlessRenderer {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessRenderer {
    pub fn new(base_url: &str, token: Option<&str>, timeout_secs: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }

    fn endpoint(&self) -> String {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }
}

#[async_trait]
impl PageRenderer for BrowserlessRenderer {
    async fn render(&self, url: &Url) -> Result<String, ExtractionError> {
        let body = serde_json::json!({ "url": url.as_str() });

        let resp = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ExtractionError::Render(format!(
                "HTTP {}: {}",
                status.as_u16(),
                message
            )));
        }

        Ok(resp.text().await?)
    }
}
