//! OpenAI-compatible chat completion provider.
//!
//! Ollama exposes the same API at localhost:11434/v1, so one client serves
//! both; only the base URL and authentication differ.

use crate::llm::{CompletionParams, LlmClient};
use crate::retry::is_retryable_status;
use anyhow::{Context, Result};
use clarion_core::ClarionError;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

const COLLABORATOR: &str = "llm";

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    /// Hosted endpoint; requires `OPENAI_API_KEY`.
    pub fn openai(model: &str, base_url: Option<&str>) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
        let base_url = base_url
            .map(str::to_string)
            .or_else(|| env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self::build(model, &base_url, Some(api_key))
    }

    /// Local Ollama server, no authentication.
    pub fn ollama(model: &str, base_url: Option<&str>) -> Result<Self> {
        let base_url = base_url
            .map(str::to_string)
            .or_else(|| env::var("OLLAMA_BASE_URL").ok())
            .unwrap_or_else(|| "http://localhost:11434/v1".to_string());
        Self::build(model, &base_url, None)
    }

    fn build(model: &str, base_url: &str, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .context("Failed to build HTTP client")?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, system: &str, prompt: &str, params: CompletionParams) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClarionError::collaborator(COLLABORATOR, format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let err_text = response.text().await.unwrap_or_default();
            let message = format!("{}: {}", status, err_text.chars().take(200).collect::<String>());
            return Err(if is_retryable_status(status) {
                ClarionError::collaborator(COLLABORATOR, message).into()
            } else {
                ClarionError::collaborator_permanent(COLLABORATOR, message).into()
            });
        }

        let resp_json: Value = response
            .json()
            .await
            .map_err(|e| ClarionError::collaborator(COLLABORATOR, format!("invalid response body: {}", e)))?;
        parse_completion(&resp_json)
    }
}

/// Text content of the first choice.
pub(crate) fn parse_completion(resp_json: &Value) -> Result<String> {
    match resp_json["choices"][0]["message"]["content"].as_str() {
        Some(content) => Ok(content.to_string()),
        None => Err(ClarionError::collaborator(COLLABORATOR, "response has no message content").into()),
    }
}
