pub mod mock;
pub mod openai;

pub use mock::MockProvider;
pub use openai::OpenAiClient;

use crate::llm::LlmClient;
use anyhow::Result;
use clarion_core::{ClarionError, LlmConfig};
use std::sync::Arc;

/// Build the LLM client named by `config.provider`.
///
/// `template` means no model at all: phrasing and interpretation fall back
/// to the built-in templates, so `None` is returned.
pub fn create_client(config: &LlmConfig) -> Result<Option<Arc<dyn LlmClient>>> {
    let base_url = config.base_url.as_deref();
    let client: Arc<dyn LlmClient> = match config.provider.as_str() {
        "template" | "none" => return Ok(None),
        "ollama" => Arc::new(OpenAiClient::ollama(&config.model, base_url)?),
        "openai" => Arc::new(OpenAiClient::openai(&config.model, base_url)?),
        "mock" => Arc::new(MockProvider::new("")),
        other => {
            return Err(ClarionError::config(format!(
                "unknown LLM provider '{}' (expected template, ollama, openai or mock)",
                other
            ))
            .into())
        }
    };
    tracing::info!("Using {} provider with model {}", config.provider, config.model);
    Ok(Some(client))
}
