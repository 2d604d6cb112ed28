//! clarion_bench: evaluation harness for simulated disambiguation sessions.
//!
//! Loads scenario files (session inputs with ground truth), drives them
//! through a [`DisambiguationLoop`] concurrently and scores each outcome:
//! - exact match against the ground-truth calls, step by step
//! - tool match and per-argument accuracy
//! - validity of every resolved call against the registry
//! - questions asked, turns used and abort rate

use anyhow::{Context, Result};
use clarion_core::{GroundTruth, SessionInput, ToolRegistry};
use clarion_reasoning::{DisambiguationLoop, MockExecutor, SessionOutcome, SessionResult, SessionStatus};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

// ============================================================================
// Scenarios
// ============================================================================

/// Load scenarios from a JSON file holding one session input or an array of
/// them, or from every `.json` file of a directory (sorted by name).
pub fn load_scenarios<P: AsRef<Path>>(path: P) -> Result<Vec<SessionInput>> {
    let path = path.as_ref();
    if path.is_dir() {
        let mut files: Vec<_> = std::fs::read_dir(path)
            .with_context(|| format!("Failed to read scenario directory: {}", path.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();
        let mut scenarios = Vec::new();
        for file in files {
            scenarios.extend(load_scenario_file(&file)?);
        }
        return Ok(scenarios);
    }
    load_scenario_file(path)
}

fn load_scenario_file(path: &Path) -> Result<Vec<SessionInput>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
    parse_scenarios(&content).with_context(|| format!("Failed to parse scenario file: {}", path.display()))
}

pub fn parse_scenarios(content: &str) -> Result<Vec<SessionInput>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let scenarios = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(scenarios)
}

/// Attach a validating [`MockExecutor`] to every tool that has none, so
/// simulated sessions run through to execution.
pub fn attach_mock_executors(registry: &mut ToolRegistry) -> Result<()> {
    let specs: Vec<_> = registry
        .specs()
        .filter(|s| registry.executor(s.name()).is_none())
        .cloned()
        .collect();
    for spec in specs {
        let name = spec.name().to_string();
        registry.attach_executor(&name, Arc::new(MockExecutor::new(spec)))?;
    }
    Ok(())
}

// ============================================================================
// Metrics
// ============================================================================

/// Scores of one finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetrics {
    pub input_id: Option<String>,
    pub request: String,
    pub status: SessionStatus,
    pub reason: String,
    /// Tool of every plan step, in order.
    pub tools: Vec<String>,
    pub exact_match: Option<bool>,
    pub tool_match: Option<bool>,
    pub argument_accuracy: Option<f64>,
    /// Every resolved call passes registry validation.
    pub valid: bool,
    /// Calls that ran successfully.
    pub executed_steps: usize,
    pub questions_asked: u64,
    pub turns: u32,
    pub widen_events: u32,
    pub certainty: f64,
}

impl SessionMetrics {
    /// Score `outcome` against the ground truth of its input. An aborted
    /// session never counts as an exact match.
    pub fn from_outcome(outcome: &SessionOutcome, truth: Option<&GroundTruth>, registry: &ToolRegistry) -> Self {
        let aborted = outcome.status == SessionStatus::Aborted;
        Self {
            input_id: outcome.input_id.clone(),
            request: outcome.request.clone(),
            status: outcome.status,
            reason: outcome.reason.to_string(),
            tools: outcome.calls.iter().map(|c| c.tool.clone()).collect(),
            exact_match: truth.map(|gt| !aborted && gt.matches(&outcome.calls)),
            tool_match: truth.map(|gt| gt.tools_match(&outcome.calls)),
            argument_accuracy: truth.map(|gt| gt.argument_accuracy(&outcome.calls)),
            valid: outcome.calls.iter().all(|c| registry.validate(c).is_ok()),
            executed_steps: outcome.executions.iter().filter(|e| !e.is_error).count(),
            questions_asked: outcome.questions_asked,
            turns: outcome.turns,
            widen_events: outcome.widen_events,
            certainty: outcome.certainty,
        }
    }

    pub fn aborted(&self) -> bool {
        self.status == SessionStatus::Aborted
    }
}

/// A session that could not be created (configuration error).
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioError {
    pub index: usize,
    pub input_id: Option<String>,
    pub error: String,
}

/// Aggregate scores of a suite run.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub total: usize,
    pub completed: usize,
    pub errors: Vec<ScenarioError>,
    pub executed: usize,
    pub aborted: usize,
    /// Over sessions with ground truth.
    pub exact_match_rate: f64,
    pub tool_match_rate: f64,
    pub argument_accuracy: f64,
    /// Over all completed sessions.
    pub validity_rate: f64,
    pub abort_rate: f64,
    pub avg_questions: f64,
    pub avg_turns: f64,
    pub sessions: Vec<SessionMetrics>,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn rate(flags: impl Iterator<Item = bool>) -> f64 {
    mean(flags.map(|f| if f { 1.0 } else { 0.0 }))
}

impl SuiteReport {
    pub fn from_results(inputs: &[SessionInput], results: &[SessionResult], registry: &ToolRegistry) -> Self {
        let mut sessions = Vec::new();
        let mut errors = Vec::new();
        for (index, result) in results.iter().enumerate() {
            match result {
                Ok(outcome) => {
                    let truth = inputs.get(index).and_then(|i| i.ground_truth.as_ref());
                    sessions.push(SessionMetrics::from_outcome(outcome, truth, registry));
                }
                Err(e) => errors.push(ScenarioError {
                    index,
                    input_id: inputs.get(index).and_then(|i| i.id.clone()),
                    error: e.to_string(),
                }),
            }
        }
        Self::from_sessions(results.len(), sessions, errors)
    }

    pub fn from_sessions(total: usize, sessions: Vec<SessionMetrics>, errors: Vec<ScenarioError>) -> Self {
        let scored: Vec<&SessionMetrics> = sessions.iter().filter(|s| s.exact_match.is_some()).collect();
        Self {
            total,
            completed: sessions.len(),
            executed: sessions.iter().filter(|s| s.status == SessionStatus::Executed).count(),
            aborted: sessions.iter().filter(|s| s.aborted()).count(),
            exact_match_rate: rate(scored.iter().map(|s| s.exact_match == Some(true))),
            tool_match_rate: rate(scored.iter().map(|s| s.tool_match == Some(true))),
            argument_accuracy: mean(scored.iter().filter_map(|s| s.argument_accuracy)),
            validity_rate: rate(sessions.iter().map(|s| s.valid)),
            abort_rate: rate(sessions.iter().map(|s| s.aborted())),
            avg_questions: mean(sessions.iter().map(|s| s.questions_asked as f64)),
            avg_turns: mean(sessions.iter().map(|s| s.turns as f64)),
            errors,
            sessions,
        }
    }

    /// Plain-text summary for terminals.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{}\n", "=".repeat(60)));
        out.push_str("SUITE SUMMARY\n");
        out.push_str(&format!("{}\n", "=".repeat(60)));
        out.push_str(&format!(
            "Scenarios:            {} ({} completed, {} errors)\n",
            self.total,
            self.completed,
            self.errors.len()
        ));
        out.push_str(&format!("Executed:             {}\n", self.executed));
        out.push_str(&format!("Exact match rate:     {:.4}\n", self.exact_match_rate));
        out.push_str(&format!("Tool match rate:      {:.4}\n", self.tool_match_rate));
        out.push_str(&format!("Argument accuracy:    {:.4}\n", self.argument_accuracy));
        out.push_str(&format!("Validity rate:        {:.4}\n", self.validity_rate));
        out.push_str(&format!("Abort rate:           {:.4}\n", self.abort_rate));
        out.push_str(&format!("Avg questions asked:  {:.2}\n", self.avg_questions));
        out.push_str(&format!("Avg turns:            {:.2}\n", self.avg_turns));
        for s in &self.sessions {
            out.push_str(&format!(
                "- [{}] {:?} {} q={} match={}\n",
                s.input_id.as_deref().unwrap_or("-"),
                s.status,
                s.tools.join(" -> "),
                s.questions_asked,
                s.exact_match.map_or("n/a".to_string(), |m| m.to_string())
            ));
        }
        for e in &self.errors {
            out.push_str(&format!(
                "! [{}] #{}: {}\n",
                e.input_id.as_deref().unwrap_or("-"),
                e.index,
                e.error
            ));
        }
        out
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Run every scenario through `engine` and score the outcomes.
pub async fn run_suite(
    engine: Arc<DisambiguationLoop>,
    inputs: Vec<SessionInput>,
    cancel: watch::Receiver<bool>,
) -> (SuiteReport, Vec<SessionResult>) {
    tracing::info!("Running suite of {} scenario(s)", inputs.len());
    let registry = Arc::clone(engine.registry());
    let results = engine.run_many(inputs.clone(), cancel).await;
    let report = SuiteReport::from_results(&inputs, &results, &registry);
    tracing::info!(
        "Suite finished: exact match {:.3}, abort rate {:.3}, avg questions {:.2}",
        report.exact_match_rate,
        report.abort_rate,
        report.avg_questions
    );
    (report, results)
}
