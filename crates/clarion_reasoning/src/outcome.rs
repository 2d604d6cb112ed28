//! Session output records.

use crate::questions::QuestionCandidate;
use crate::selector::{ScoredQuestion, StopReason};
use chrono::{DateTime, Utc};
use clarion_core::{ExecutionOutcome, Observation, ResolvedCall};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Executed,
    ReadyToExecute,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationReason {
    CertaintyReached { certainty: f64 },
    NoCandidates,
    BelowThreshold { best: f64, threshold: f64 },
    BudgetExhausted,
    TurnCapReached { turns: u32 },
    ValidationFailed {
        step: usize,
        tool: String,
        arguments: Vec<String>,
        reason: String,
    },
    CollaboratorFailed { collaborator: String, message: String },
    Timeout,
    Cancelled,
}

impl From<StopReason> for TerminationReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::NoCandidates => TerminationReason::NoCandidates,
            StopReason::BelowThreshold { best, threshold } => {
                TerminationReason::BelowThreshold { best, threshold }
            }
            StopReason::BudgetExhausted => TerminationReason::BudgetExhausted,
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::CertaintyReached { certainty } => {
                write!(f, "certainty {:.3} reached", certainty)
            }
            TerminationReason::NoCandidates => f.write_str("no question left to ask"),
            TerminationReason::BelowThreshold { best, threshold } => {
                write!(f, "best question score {:.3} below threshold {:.3}", best, threshold)
            }
            TerminationReason::BudgetExhausted => f.write_str("question budget exhausted"),
            TerminationReason::TurnCapReached { turns } => write!(f, "turn cap reached after {} turns", turns),
            TerminationReason::ValidationFailed { step, tool, arguments, .. } => write!(
                f,
                "validation of {} at step {} kept failing ({})",
                tool,
                step + 1,
                arguments.join(", ")
            ),
            TerminationReason::CollaboratorFailed { collaborator, message } => {
                write!(f, "{} failed: {}", collaborator, message)
            }
            TerminationReason::Timeout => f.write_str("session timed out"),
            TerminationReason::Cancelled => f.write_str("session cancelled"),
        }
    }
}

/// One question/answer exchange with the scores that led to it.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub turn: u32,
    pub question: QuestionCandidate,
    pub phrasing: String,
    /// `None` when the answer source declined.
    pub answer: Option<String>,
    pub observations: Vec<Observation>,
    pub evpi: f64,
    pub delta_regret: f64,
    pub ucb: f64,
    pub threshold: f64,
    /// Every question scored this turn, in generation order.
    pub scored: Vec<ScoredQuestion>,
    pub certainty_before: f64,
    pub certainty_after: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub widened: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedCall {
    pub step: usize,
    pub call: ResolvedCall,
    pub prior: f64,
    pub certainty: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_id: Option<String>,
    pub request: String,
    pub status: SessionStatus,
    pub reason: TerminationReason,
    /// Most probable call of every plan step, in execution order; best
    /// effort when aborted.
    pub calls: Vec<ResolvedCall>,
    /// Runner-up interpretations of every step.
    pub alternatives: Vec<RankedCall>,
    /// Product of the step certainties.
    pub certainty: f64,
    pub low_confidence: bool,
    pub turns: u32,
    pub questions_asked: u64,
    pub widen_events: u32,
    pub validation_retries: u32,
    /// Results of the calls executed so far, in order. A failed call is the
    /// last entry.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub executions: Vec<ExecutionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches_ground_truth: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument_accuracy: Option<f64>,
    pub transcript: Vec<TurnRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionOutcome {
    pub fn is_aborted(&self) -> bool {
        self.status == SessionStatus::Aborted
    }

    /// The call of the first plan step.
    pub fn first_call(&self) -> Option<&ResolvedCall> {
        self.calls.first()
    }
}
