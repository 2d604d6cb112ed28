//! Mock LLM Provider: scripted responses for testing without a model server.

use crate::llm::{CompletionParams, LlmClient};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays scripted responses in order and records every prompt it saw.
/// Once the script runs out it answers with `fallback`.
#[derive(Debug, Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    fallback: String,
}

impl MockProvider {
    pub fn new(fallback: &str) -> Self {
        Self {
            fallback: fallback.to_string(),
            ..Self::default()
        }
    }

    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(responses.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl LlmClient for MockProvider {
    async fn complete(&self, _system: &str, prompt: &str, _params: CompletionParams) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}
