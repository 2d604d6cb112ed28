//! The seam between Clarion and a language model. Only the phraser and the
//! simulated requester talk to a model, and both need nothing more than a
//! single prompt in and a single string out.

use anyhow::Result;
use async_trait::async_trait;
use clarion_core::LlmConfig;

/// Sampling knobs passed through to the provider on every call.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    /// Upper bound on generated tokens
    pub max_tokens: u32,
    /// Kept low: questions should read the same from run to run
    pub temperature: f32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.2,
        }
    }
}

impl From<&LlmConfig> for CompletionParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str, params: CompletionParams) -> Result<String>;
}
