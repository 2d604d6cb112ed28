use crate::collaborators::{target_views, tool_options, TargetView};
use crate::questions::QuestionCandidate;
use clarion_core::{BeliefState, SessionInput};

pub const PHRASE_SYSTEM: &str = "You help an assistant clarify an ambiguous request before it calls a tool. \
Write exactly one short, friendly clarifying question. Output only the question.";

pub const INTERPRET_SYSTEM: &str = "You extract structured values from a user's reply to a clarifying question. \
Answer with JSON only.";

pub const USER_SYSTEM: &str = "You are role-playing a user talking to an AI assistant. \
Reply in one or two natural sentences.";

pub struct PromptBuilder;

impl PromptBuilder {
    pub fn phrase(question: &QuestionCandidate, state: &BeliefState) -> String {
        format!(
            "== ORIGINAL REQUEST ==\n{}\n\n== CONVERSATION SO FAR ==\n{}\n\n== WHAT IS STILL UNCLEAR ==\n{}\n\nAsk one question that resolves everything listed above.",
            state.request(),
            Self::history(state),
            Self::targets(question, state),
        )
    }

    pub fn interpret(answer: &str, question: &QuestionCandidate, state: &BeliefState) -> String {
        let names: Vec<&str> = question.argument_names();
        let call_hint = if question.asks_call_selection() {
            "\nIf the reply says which action is wanted, add {\"argument\": \"@call\", \"value\": \"<action name>\"}."
        } else {
            ""
        };
        format!(
            "== ORIGINAL REQUEST ==\n{}\n\n== QUESTION TARGETS ==\n{}\n\n== USER REPLY ==\n{}\n\n\
Return {{\"observations\": [{{\"argument\": \"<name>\", \"value\": <value or null>, \"confidence\": <0..1>}}]}} \
with one entry per argument in [{}]. Use null when the reply does not say.{}",
            state.request(),
            Self::targets(question, state),
            answer,
            names.join(", "),
            call_hint,
        )
    }

    /// `step` is the plan step the question is about.
    pub fn user_reply(question: &str, step: usize, input: &SessionInput) -> String {
        let steps = input.ground_truth.as_ref().map_or(0, |gt| gt.calls().len());
        let focus = if steps > 1 {
            format!("\n\nThe assistant is asking about call {} of {}.", step + 1, steps)
        } else {
            String::new()
        };
        let ground_truth = input
            .ground_truth
            .as_ref()
            .and_then(|gt| serde_json::to_string(gt).ok())
            .unwrap_or_else(|| "(unknown)".to_string());
        let context = if input.context.is_empty() {
            "(none)".to_string()
        } else {
            serde_json::to_string(&input.context).unwrap_or_default()
        };
        format!(
            "Original request: \"{}\"\n\nYour intent: {}\n\nWhat you actually want (the correct tool calls, in order):\n{}\n\n\
Additional context:\n{}{}\n\nThe assistant asks:\n\"{}\"\n\n\
Reply the way this user would. Be consistent with what you want, answer only what was asked, \
and do not recite the tool call verbatim.",
            input.request,
            input.intent.as_deref().unwrap_or("No specific intent provided."),
            ground_truth,
            context,
            focus,
            question,
        )
    }

    fn history(state: &BeliefState) -> String {
        if state.history().is_empty() {
            return "(none)".to_string();
        }
        state
            .history()
            .iter()
            .map(|qa| format!("Assistant: {}\nUser: {}", qa.question, qa.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn targets(question: &QuestionCandidate, state: &BeliefState) -> String {
        let mut lines: Vec<String> = target_views(question, state).iter().map(Self::target_line).collect();
        if question.asks_call_selection() {
            let tools: Vec<String> = tool_options(state)
                .into_iter()
                .map(|(t, p)| format!("{} ({:.0}%)", t, p * 100.0))
                .collect();
            lines.push(format!("- which action: {}", tools.join(", ")));
        }
        lines.join("\n")
    }

    fn target_line(view: &TargetView) -> String {
        let mut line = format!("- {}: {}", view.argument, view.domain);
        if !view.description.is_empty() {
            line.push_str(&format!(" ({})", view.description));
        }
        if !view.options.is_empty() {
            let likely: Vec<String> = view
                .options
                .iter()
                .map(|(v, p)| format!("{} {:.0}%", v, p * 100.0))
                .collect();
            line.push_str(&format!("; likely {}", likely.join(", ")));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questions::generate;
    use clarion_core::{ArgumentSpec, CandidateCall, Domain, EngineConfig, ExpectedCall, GroundTruth, ToolSpec};
    use std::sync::Arc;

    #[test]
    fn test_phrase_prompt_names_targets() {
        let spec = ToolSpec::new("convert", "", vec![ArgumentSpec::new("format", Domain::enumerated(["png", "jpg"]))]).unwrap();
        let state = BeliefState::new("convert the slides", vec![CandidateCall::new(Arc::new(spec), 1.0)]).unwrap();
        let q = &generate(&state, &EngineConfig::default())[0];
        let prompt = PromptBuilder::phrase(q, &state);
        assert!(prompt.contains("convert the slides"));
        assert!(prompt.contains("- format: one of: png, jpg; likely png 50%, jpg 50%"));

        let prompt = PromptBuilder::interpret("png", q, &state);
        assert!(prompt.contains("[format]"));
        assert!(!prompt.contains("@call"));
    }

    #[test]
    fn test_user_prompt_carries_ground_truth() {
        let mut input = SessionInput::new("send it");
        input.ground_truth = Some(GroundTruth::single(ExpectedCall {
            tool: "send_message".into(),
            arguments: Default::default(),
        }));
        let prompt = PromptBuilder::user_reply("Who should get it?", 0, &input);
        assert!(prompt.contains("send_message"));
        assert!(prompt.contains("No specific intent provided."));
        assert!(prompt.contains("Who should get it?"));
        assert!(!prompt.contains("call 1 of"));
    }

    #[test]
    fn test_user_prompt_names_the_step_of_a_plan() {
        let mut input = SessionInput::new("convert then send it");
        input.ground_truth = Some(GroundTruth::sequence(vec![
            ExpectedCall::new("convert", [("format", "png")]),
            ExpectedCall::new("send_message", [("channel", "email")]),
        ]));
        let prompt = PromptBuilder::user_reply("Which channel?", 1, &input);
        assert!(prompt.contains("call 2 of 2"));
        assert!(prompt.contains("convert"));
        assert!(prompt.contains("send_message"));
    }
}
