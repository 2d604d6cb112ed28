//! Deterministic question phrasing and answer interpretation.
//!
//! Used when no model is configured, and as the fallback interpreter when a
//! model's reply cannot be parsed.

use crate::collaborators::{target_views, tool_options, QuestionPhraser, TargetView};
use crate::questions::QuestionCandidate;
use anyhow::Result;
use async_trait::async_trait;
use clarion_core::belief::MASS_EPSILON;
use clarion_core::{ArgValue, BeliefState, Domain, Observation};
use regex::Regex;

const UNKNOWN_PATTERNS: &[&str] = &[
    "don't know",
    "dont know",
    "do not know",
    "not sure",
    "no idea",
    "unsure",
    "doesn't matter",
    "don't care",
    "whatever",
];

/// Longest reply (in words) still passed on as free text when nothing in it
/// names a domain value.
const FREE_TEXT_MAX_WORDS: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct TemplatePhraser;

impl TemplatePhraser {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, question: &QuestionCandidate, state: &BeliefState) -> String {
        let mut parts: Vec<String> = target_views(question, state).iter().map(render_view).collect();
        if question.asks_call_selection() {
            let tools: Vec<String> = tool_options(state)
                .into_iter()
                .filter(|(_, p)| *p > MASS_EPSILON)
                .map(|(t, _)| t)
                .collect();
            parts.push(format!("Which action do you want: {}?", tools.join(" or ")));
        }
        parts.join(" ")
    }

    /// Interpret `answer` for the targets of `question`.
    pub fn parse(&self, answer: &str, question: &QuestionCandidate, state: &BeliefState) -> Vec<Observation> {
        let names = question.argument_names();
        let lowered = answer.to_lowercase();
        if UNKNOWN_PATTERNS.iter().any(|p| lowered.contains(p)) {
            return names
                .into_iter()
                .map(|n| Observation::Unknown { argument: n.to_string() })
                .collect();
        }

        let tokens = tokenize(answer);
        let mut used = vec![false; tokens.len()];
        let mut observations = Vec::new();

        for name in &names {
            let domains = declared_domains(state, name);
            if let Some(text) = explicit_value(answer, name) {
                let value = domains
                    .iter()
                    .find_map(|d| d.parse(&text))
                    .unwrap_or_else(|| raw_value(&text));
                observations.push(Observation::value(*name, value));
                continue;
            }
            if let Some(value) = scan_tokens(&tokens, &mut used, &domains) {
                observations.push(Observation::value(*name, value));
                continue;
            }
            if names.len() == 1 && domains.iter().any(is_boolean) {
                if let Some(b) = yes_no(&lowered) {
                    observations.push(Observation::value(*name, b));
                    continue;
                }
            }
            if names.len() == 1 && !answer.trim().is_empty() && tokens.len() <= FREE_TEXT_MAX_WORDS {
                observations.push(Observation::FreeText {
                    argument: name.to_string(),
                    text: answer.trim().to_string(),
                });
            } else {
                observations.push(Observation::Unknown { argument: name.to_string() });
            }
        }

        if question.asks_call_selection() {
            if let Some(tool) = mentioned_tool(&lowered, state) {
                observations.push(Observation::call(tool));
            }
        }
        observations
    }
}

#[async_trait]
impl QuestionPhraser for TemplatePhraser {
    fn name(&self) -> &str {
        "template"
    }

    async fn phrase(&self, question: &QuestionCandidate, state: &BeliefState) -> Result<String> {
        Ok(self.render(question, state))
    }

    async fn interpret(
        &self,
        answer: &str,
        question: &QuestionCandidate,
        state: &BeliefState,
    ) -> Result<Vec<Observation>> {
        Ok(self.parse(answer, question, state))
    }
}

fn render_view(view: &TargetView) -> String {
    let subject = if view.description.is_empty() {
        view.argument.replace('_', " ")
    } else {
        format!("{} ({})", view.argument.replace('_', " "), view.description)
    };
    if view.options.is_empty() {
        format!("What {} do you want? It should be {}.", subject, view.domain)
    } else {
        let listed: Vec<String> = view.options.iter().map(|(v, _)| v.to_string()).collect();
        format!("Which {} do you want, for example {}?", subject, listed.join(", "))
    }
}

fn declared_domains<'a>(state: &'a BeliefState, name: &str) -> Vec<&'a Domain> {
    let mut domains: Vec<&Domain> = Vec::new();
    for c in state.candidates() {
        if let Some((spec, _)) = c.argument(name) {
            if !domains.contains(&&spec.domain) {
                domains.push(&spec.domain);
            }
        }
    }
    domains
}

fn is_boolean(domain: &&Domain) -> bool {
    matches!(domain, Domain::Enumerated { values } if values.iter().all(|v| matches!(v, ArgValue::Bool(_))))
}

/// `name: value` or `name = value`, with `_` in the name also matching a space.
fn explicit_value(answer: &str, name: &str) -> Option<String> {
    let pattern = regex::escape(name).replace('_', "[_ ]");
    let re = Regex::new(&format!(r"(?i)\b{}\s*[:=]\s*([^,;\n]+)", pattern)).ok()?;
    let caps = re.captures(answer)?;
    let value = caps.get(1)?.as_str().trim().trim_end_matches('.').trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn raw_value(text: &str) -> ArgValue {
    let cleaned = text.trim().trim_matches(|c| c == '"' || c == '\'');
    if let Ok(n) = cleaned.parse::<f64>() {
        if n.is_finite() {
            return ArgValue::Number(n);
        }
    }
    match cleaned.to_lowercase().as_str() {
        "true" => ArgValue::Bool(true),
        "false" => ArgValue::Bool(false),
        _ => ArgValue::Text(cleaned.to_string()),
    }
}

fn tokenize(answer: &str) -> Vec<String> {
    answer
        .split(|c: char| !(c.is_alphanumeric() || c == '.' || c == '-' || c == '_'))
        .map(|t| t.trim_end_matches('.'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// First unused token that names a value of one of `domains`.
fn scan_tokens(tokens: &[String], used: &mut [bool], domains: &[&Domain]) -> Option<ArgValue> {
    for (i, token) in tokens.iter().enumerate() {
        if used[i] {
            continue;
        }
        if let Some(value) = domains.iter().find_map(|d| d.parse(token)) {
            used[i] = true;
            return Some(value);
        }
    }
    None
}

fn yes_no(lowered: &str) -> Option<bool> {
    let first = lowered.split(|c: char| !c.is_alphanumeric()).find(|w| !w.is_empty())?;
    match first {
        "yes" | "yeah" | "yep" | "sure" | "please" | "true" => Some(true),
        "no" | "nope" | "false" => Some(false),
        _ => None,
    }
}

fn mentioned_tool(lowered: &str, state: &BeliefState) -> Option<String> {
    tool_options(state)
        .into_iter()
        .map(|(t, _)| t)
        .find(|t| {
            let name = t.to_lowercase();
            lowered.contains(&name) || lowered.contains(&name.replace('_', " "))
        })
}
