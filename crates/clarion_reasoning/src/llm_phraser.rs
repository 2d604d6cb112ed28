//! Question phrasing and answer interpretation through a language model.

use crate::collaborators::QuestionPhraser;
use crate::llm::{CompletionParams, LlmClient};
use crate::parsing::parse_lenient;
use crate::prompts::{PromptBuilder, INTERPRET_SYSTEM, PHRASE_SYSTEM};
use crate::questions::QuestionCandidate;
use crate::template::TemplatePhraser;
use anyhow::Result;
use async_trait::async_trait;
use clarion_core::{ArgValue, BeliefState, Observation, CALL_SELECTION_KEY};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct InterpretResponse {
    #[serde(default)]
    observations: Vec<RawObservation>,
}

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct RawObservation {
    argument: String,
    #[serde(default)]
    value: Option<ArgValue>,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

pub struct LlmPhraser {
    client: Arc<dyn LlmClient>,
    params: CompletionParams,
    fallback: TemplatePhraser,
}

impl LlmPhraser {
    pub fn new(client: Arc<dyn LlmClient>, params: CompletionParams) -> Self {
        Self {
            client,
            params,
            fallback: TemplatePhraser::new(),
        }
    }
}

#[async_trait]
impl QuestionPhraser for LlmPhraser {
    fn name(&self) -> &str {
        "llm_phraser"
    }

    async fn phrase(&self, question: &QuestionCandidate, state: &BeliefState) -> Result<String> {
        let prompt = PromptBuilder::phrase(question, state);
        let text = self.client.complete(PHRASE_SYSTEM, &prompt, self.params.clone()).await?;
        let text = text.trim().trim_matches('"').trim();
        if text.is_empty() {
            tracing::debug!("Model returned an empty question, using template phrasing");
            return Ok(self.fallback.render(question, state));
        }
        Ok(text.to_string())
    }

    async fn interpret(
        &self,
        answer: &str,
        question: &QuestionCandidate,
        state: &BeliefState,
    ) -> Result<Vec<Observation>> {
        let prompt = PromptBuilder::interpret(answer, question, state);
        let text = self.client.complete(INTERPRET_SYSTEM, &prompt, self.params.clone()).await?;
        match parse_lenient::<InterpretResponse>(&text) {
            Some(response) => Ok(to_observations(response, question, state)),
            None => {
                tracing::warn!("Could not parse interpretation, falling back to template parsing");
                Ok(self.fallback.parse(answer, question, state))
            }
        }
    }
}

/// Keep entries for targeted arguments only, snapping values onto the
/// declared domains where possible. Unparseable values are kept as-is so
/// they reach the widen path.
fn to_observations(response: InterpretResponse, question: &QuestionCandidate, state: &BeliefState) -> Vec<Observation> {
    let names = question.argument_names();
    let mut observations = Vec::new();
    for raw in response.observations {
        let confidence = raw.confidence.clamp(0.0, 1.0);
        if raw.argument == CALL_SELECTION_KEY {
            if let (true, Some(value)) = (question.asks_call_selection(), raw.value) {
                observations.push(Observation::Call {
                    tool: value.to_string(),
                    confidence,
                });
            }
            continue;
        }
        if !names.contains(&raw.argument.as_str()) {
            tracing::debug!("Ignoring interpreted value for untargeted argument '{}'", raw.argument);
            continue;
        }
        let Some(value) = raw.value else {
            observations.push(Observation::Unknown { argument: raw.argument });
            continue;
        };
        let snapped = state
            .candidates()
            .iter()
            .filter_map(|c| c.argument(&raw.argument))
            .find_map(|(spec, _)| spec.domain.parse(&value.to_string()))
            .unwrap_or(value);
        observations.push(Observation::Value {
            argument: raw.argument,
            value: snapped,
            confidence,
        });
    }
    observations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use crate::questions::generate;
    use clarion_core::{ArgumentSpec, CandidateCall, Domain, EngineConfig, ToolSpec};

    fn state() -> BeliefState {
        let spec = ToolSpec::new(
            "convert",
            "",
            vec![
                ArgumentSpec::new("format", Domain::enumerated(["png", "jpg"])),
                ArgumentSpec::new("page", Domain::range(1.0, 9.0, 1.0)),
            ],
        )
        .unwrap();
        BeliefState::new("convert it", vec![CandidateCall::new(Arc::new(spec), 1.0)]).unwrap()
    }

    #[tokio::test]
    async fn test_phrase_uses_model_text() {
        let s = state();
        let q = &generate(&s, &EngineConfig::default())[0];
        let phraser = LlmPhraser::new(
            Arc::new(MockProvider::scripted(["\"Which format should the output be?\""])),
            CompletionParams::default(),
        );
        assert_eq!(phraser.phrase(q, &s).await.unwrap(), "Which format should the output be?");
    }

    #[tokio::test]
    async fn test_interpret_parses_fenced_json() {
        let s = state();
        let q = &generate(&s, &EngineConfig::default())[0];
        let reply = "```json\n{\"observations\": [{\"argument\": \"format\", \"value\": \"PNG\", \"confidence\": 0.9}, {\"argument\": \"page\", \"value\": 3}]}\n```";
        let phraser = LlmPhraser::new(Arc::new(MockProvider::scripted([reply])), CompletionParams::default());
        let obs = phraser.interpret("png", q, &s).await.unwrap();
        // `page` is not a target of the format question.
        assert_eq!(
            obs,
            vec![Observation::Value {
                argument: "format".into(),
                value: ArgValue::from("png"),
                confidence: 0.9
            }]
        );
    }

    #[tokio::test]
    async fn test_null_value_is_unknown_and_garbage_falls_back() {
        let s = state();
        let q = &generate(&s, &EngineConfig::default())[0];
        let phraser = LlmPhraser::new(
            Arc::new(MockProvider::scripted([
                r#"{"observations": [{"argument": "format", "value": null}]}"#,
                "I think they want a jpg",
            ])),
            CompletionParams::default(),
        );
        assert_eq!(
            phraser.interpret("not sure", q, &s).await.unwrap(),
            vec![Observation::Unknown {
                argument: "format".into()
            }]
        );
        assert_eq!(
            phraser.interpret("jpg", q, &s).await.unwrap(),
            vec![Observation::value("format", "jpg")]
        );
    }
}
