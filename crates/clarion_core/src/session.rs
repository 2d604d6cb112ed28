//! Session input records and initial belief construction.

use crate::belief::{ArgumentBelief, BeliefState, CandidateCall, ResolvedCall};
use crate::error::{ClarionError, Result};
use crate::registry::ToolRegistry;
use crate::value::{ArgValue, WeightedValue};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Named contextual fields of a session (e.g. `number_of_pages`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionContext(BTreeMap<String, serde_json::Value>);

impl SessionContext {
    pub fn insert(&mut self, field: impl Into<String>, value: serde_json::Value) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }

    /// Numeric field, accepting JSON numbers and numeric strings.
    pub fn number(&self, field: &str) -> Option<f64> {
        match self.0.get(field)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One call the requester actually meant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedCall {
    pub tool: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgValue>,
}

impl ExpectedCall {
    pub fn new<I, K, V>(tool: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ArgValue>,
    {
        Self {
            tool: tool.into(),
            arguments: arguments.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn matches(&self, call: &ResolvedCall) -> bool {
        call.tool == self.tool && call.arguments == self.arguments
    }

    /// Fraction of expected arguments the call got right (0 on wrong tool).
    pub fn argument_accuracy(&self, call: &ResolvedCall) -> f64 {
        if call.tool != self.tool {
            return 0.0;
        }
        if self.arguments.is_empty() {
            return 1.0;
        }
        let correct = self
            .arguments
            .iter()
            .filter(|(name, value)| call.arguments.get(*name) == Some(*value))
            .count();
        correct as f64 / self.arguments.len() as f64
    }
}

/// The ordered calls the requester actually meant, for simulation and
/// scoring. Scenario files give either one call object or an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GroundTruthRepr", into = "Vec<ExpectedCall>")]
pub struct GroundTruth {
    calls: Vec<ExpectedCall>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GroundTruthRepr {
    Sequence(Vec<ExpectedCall>),
    Single(ExpectedCall),
}

impl From<GroundTruthRepr> for GroundTruth {
    fn from(repr: GroundTruthRepr) -> Self {
        match repr {
            GroundTruthRepr::Sequence(calls) => Self { calls },
            GroundTruthRepr::Single(call) => Self { calls: vec![call] },
        }
    }
}

impl From<GroundTruth> for Vec<ExpectedCall> {
    fn from(truth: GroundTruth) -> Self {
        truth.calls
    }
}

impl GroundTruth {
    pub fn single(call: ExpectedCall) -> Self {
        Self { calls: vec![call] }
    }

    pub fn sequence(calls: Vec<ExpectedCall>) -> Self {
        Self { calls }
    }

    pub fn calls(&self) -> &[ExpectedCall] {
        &self.calls
    }

    /// The expected call of plan step `index`.
    pub fn step(&self, index: usize) -> Option<&ExpectedCall> {
        self.calls.get(index)
    }

    /// Same number of calls, each matching in order.
    pub fn matches(&self, calls: &[ResolvedCall]) -> bool {
        calls.len() == self.calls.len() && self.calls.iter().zip(calls).all(|(e, c)| e.matches(c))
    }

    /// Same tools in the same order, arguments aside.
    pub fn tools_match(&self, calls: &[ResolvedCall]) -> bool {
        calls.len() == self.calls.len() && self.calls.iter().zip(calls).all(|(e, c)| e.tool == c.tool)
    }

    /// Mean per-step argument accuracy. Missing or surplus steps score 0.
    pub fn argument_accuracy(&self, calls: &[ResolvedCall]) -> f64 {
        let steps = self.calls.len().max(calls.len());
        if steps == 0 {
            return 1.0;
        }
        let total: f64 = self
            .calls
            .iter()
            .zip(calls)
            .map(|(e, c)| e.argument_accuracy(c))
            .sum();
        total / steps as f64
    }
}

/// One argument as produced by the extraction step: a single value or a
/// weighted list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractedArgument {
    Distribution(Vec<WeightedValue>),
    Value(ArgValue),
}

fn default_prior() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCall {
    pub tool: String,
    #[serde(default = "default_prior")]
    pub prior: f64,
    #[serde(default)]
    pub arguments: BTreeMap<String, ExtractedArgument>,
}

/// One step of a multi-call plan and its competing interpretations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// What this step should accomplish; the request text is used when unset.
    #[serde(default)]
    pub description: Option<String>,
    /// Empty means "any registered tool".
    #[serde(default)]
    pub candidates: Vec<ExtractedCall>,
}

/// Everything a session starts from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInput {
    #[serde(default)]
    pub id: Option<String>,
    pub request: String,
    /// Longer description of what the requester wants, for simulated users.
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub ground_truth: Option<GroundTruth>,
    #[serde(default)]
    pub context: SessionContext,
    /// Extracted interpretations of a single-call request. Empty means "any
    /// registered tool".
    #[serde(default)]
    pub candidates: Vec<ExtractedCall>,
    /// Ordered steps of a multi-call request. Used instead of `candidates`.
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

impl SessionInput {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            id: None,
            request: request.into(),
            intent: None,
            ground_truth: None,
            context: SessionContext::default(),
            candidates: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session file: {}", path.display()))
    }
}

/// Build the initial belief state of every plan step, in order.
///
/// A request without `steps` is a single-step plan over `candidates`.
/// Giving both is a configuration error.
pub fn initial_plan(registry: &ToolRegistry, input: &SessionInput) -> Result<Vec<BeliefState>> {
    if input.steps.is_empty() {
        return Ok(vec![step_belief(registry, &input.request, &input.context, &input.candidates)?]);
    }
    if !input.candidates.is_empty() {
        return Err(ClarionError::config(format!(
            "request '{}' gives both candidates and steps",
            input.request
        )));
    }
    input
        .steps
        .iter()
        .map(|step| {
            let request = step.description.as_deref().unwrap_or(&input.request);
            step_belief(registry, request, &input.context, &step.candidates)
        })
        .collect()
}

/// Build the belief state of one step.
///
/// Every candidate's tool spec is narrowed by the session context first.
/// Extracted values outside the declared domain are dropped with a warning
/// and the argument starts uniform. Candidates naming unknown tools are
/// skipped; a step left without candidates is a configuration error.
fn step_belief(
    registry: &ToolRegistry,
    request: &str,
    context: &SessionContext,
    extracted_calls: &[ExtractedCall],
) -> Result<BeliefState> {
    let mut candidates = Vec::new();

    if extracted_calls.is_empty() {
        for spec in registry.specs() {
            candidates.push(CandidateCall::new(Arc::new(spec.narrowed(context)?), 1.0));
        }
    }

    for extracted in extracted_calls {
        let Some(spec) = registry.get(&extracted.tool) else {
            tracing::warn!("Extraction proposed unknown tool '{}', skipping", extracted.tool);
            continue;
        };
        let narrowed = Arc::new(spec.narrowed(context)?);
        let mut candidate = CandidateCall::new(Arc::clone(&narrowed), extracted.prior);

        for (name, arg) in &extracted.arguments {
            let Some(arg_spec) = narrowed.argument(name) else {
                tracing::warn!("{} has no argument '{}', ignoring extracted value", narrowed.name(), name);
                continue;
            };
            let belief = match arg {
                ExtractedArgument::Value(v) if arg_spec.domain.contains(v) => {
                    ArgumentBelief::resolved(&arg_spec.domain, v.clone())
                }
                ExtractedArgument::Value(v) => {
                    tracing::warn!(
                        "Extracted {}.{}={} is outside {}, starting uniform",
                        narrowed.name(),
                        name,
                        v,
                        arg_spec.domain.describe()
                    );
                    ArgumentBelief::uniform(&arg_spec.domain)
                }
                ExtractedArgument::Distribution(ws) => ArgumentBelief::from_weights(&arg_spec.domain, ws),
            };
            candidate = candidate.with_belief(name, belief)?;
        }
        candidates.push(candidate);
    }

    if candidates.is_empty() {
        return Err(ClarionError::config(format!(
            "no candidate call for request '{}' matches a registered tool",
            request
        )));
    }
    BeliefState::new(request, candidates)
}
