//! Simulated requesters for evaluation runs.

use crate::collaborators::{Answer, AnswerSource, PhrasedQuestion};
use crate::llm::{CompletionParams, LlmClient};
use crate::prompts::{PromptBuilder, USER_SYSTEM};
use anyhow::Result;
use async_trait::async_trait;
use clarion_core::SessionInput;
use std::sync::Arc;

/// Answers directly from the session's ground truth with `name: value`
/// lines, and `tool: name` when asked which action is meant. Questions about
/// a plan step are answered from that step's expected call.
#[derive(Debug, Clone, Default)]
pub struct GroundTruthSimulator;

impl GroundTruthSimulator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnswerSource for GroundTruthSimulator {
    fn name(&self) -> &str {
        "ground_truth_simulator"
    }

    async fn answer(&self, question: &PhrasedQuestion, input: &SessionInput) -> Result<Answer> {
        let step = question.question.step;
        let Some(truth) = input.ground_truth.as_ref().and_then(|gt| gt.step(step)) else {
            tracing::debug!("No ground truth for step {} of '{}', declining", step + 1, input.request);
            return Ok(Answer::Declined);
        };
        let mut lines: Vec<String> = question
            .question
            .argument_names()
            .into_iter()
            .filter_map(|name| truth.arguments.get(name).map(|v| format!("{}: {}", name, v)))
            .collect();
        if question.question.asks_call_selection() {
            lines.push(format!("tool: {}", truth.tool));
        }
        if lines.is_empty() {
            return Ok(Answer::Declined);
        }
        Ok(Answer::Text(lines.join("\n")))
    }
}

/// Asks a model to role-play the requester, given the request, the intent
/// and the call they actually want.
pub struct LlmUserSimulator {
    client: Arc<dyn LlmClient>,
    params: CompletionParams,
}

impl LlmUserSimulator {
    pub fn new(client: Arc<dyn LlmClient>, params: CompletionParams) -> Self {
        Self { client, params }
    }
}

#[async_trait]
impl AnswerSource for LlmUserSimulator {
    fn name(&self) -> &str {
        "llm_user_simulator"
    }

    async fn answer(&self, question: &PhrasedQuestion, input: &SessionInput) -> Result<Answer> {
        let prompt = PromptBuilder::user_reply(&question.text, question.question.step, input);
        let reply = self.client.complete(USER_SYSTEM, &prompt, self.params.clone()).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Ok(Answer::Declined);
        }
        Ok(Answer::Text(reply.to_string()))
    }
}
