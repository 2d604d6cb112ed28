//! Synchronous session state machine.
//!
//! A [`Session`] owns one belief state per plan step and the question
//! statistics they share. Steps are settled in order: questions target the
//! active step until it is certain enough or the selector stops, then the
//! next step becomes active. All of its methods are pure computation; the
//! async loop in [`crate::engine`] decides when to call them and performs
//! the collaborator I/O in between.

use crate::evaluator::{Evaluator, QuestionScore};
use crate::outcome::{RankedCall, SessionOutcome, SessionStatus, TerminationReason, TurnRecord};
use crate::questions::generate;
use crate::selector::{QuestionStats, ScoredQuestion, Selection, Selector};
use chrono::{DateTime, Utc};
use clarion_core::{
    initial_plan, ApplyReport, BeliefState, ClarionError, EngineConfig, ExecutionOutcome, Observation, QaExchange,
    ResolvedCall, Result, SessionInput, ToolRegistry,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Scoring,
    Asking,
    AwaitingAnswer,
    ReadyToExecute,
    Executed,
    Aborted,
}

/// Result of one scoring step.
#[derive(Debug, Clone)]
pub enum Decision {
    Ask(ScoredQuestion),
    Ready(TerminationReason),
    Abort(TerminationReason),
}

#[derive(Debug, Clone)]
struct PendingTurn {
    scored: Vec<ScoredQuestion>,
    selected: usize,
    threshold: f64,
    certainty_before: f64,
}

pub struct Session {
    id: Uuid,
    input: SessionInput,
    steps: Vec<BeliefState>,
    active: usize,
    stats: QuestionStats,
    config: EngineConfig,
    evaluator: Evaluator,
    selector: Selector,
    turn: u32,
    phase: Phase,
    pending: Option<PendingTurn>,
    transcript: Vec<TurnRecord>,
    executions: Vec<ExecutionOutcome>,
    widen_events: u32,
    validation_retries: u32,
    started_at: DateTime<Utc>,
}

impl Session {
    /// Create a session from its input record. Fails with a configuration
    /// error when the engine config or the extraction is unusable.
    pub fn new(registry: &ToolRegistry, input: SessionInput, config: EngineConfig) -> Result<Self> {
        let steps = initial_plan(registry, &input)?;
        Self::from_plan(steps, input, config)
    }

    pub fn from_plan(steps: Vec<BeliefState>, input: SessionInput, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        if steps.is_empty() {
            return Err(ClarionError::config(format!("request '{}' has an empty plan", input.request)));
        }
        let id = Uuid::new_v4();
        tracing::info!(
            "Session {} created for '{}' with {} step(s), {} candidate call(s)",
            id,
            input.request,
            steps.len(),
            steps.iter().map(|s| s.candidates().len()).sum::<usize>()
        );
        Ok(Self {
            id,
            evaluator: Evaluator::new(&config),
            selector: Selector::new(&config),
            input,
            steps,
            active: 0,
            stats: QuestionStats::new(),
            config,
            turn: 0,
            phase: Phase::Init,
            pending: None,
            transcript: Vec::new(),
            executions: Vec::new(),
            widen_events: 0,
            validation_retries: 0,
            started_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn input(&self) -> &SessionInput {
        &self.input
    }

    /// Belief state of the active step.
    pub fn belief(&self) -> &BeliefState {
        &self.steps[self.active]
    }

    pub fn steps(&self) -> &[BeliefState] {
        &self.steps
    }

    pub fn active_step(&self) -> usize {
        self.active
    }

    pub fn stats(&self) -> &QuestionStats {
        &self.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn transcript(&self) -> &[TurnRecord] {
        &self.transcript
    }

    pub fn widen_events(&self) -> u32 {
        self.widen_events
    }

    pub fn validation_retries(&self) -> u32 {
        self.validation_retries
    }

    /// Certainty of the whole plan: the product of the step certainties.
    pub fn certainty(&self) -> f64 {
        let model = self.evaluator.model();
        self.steps.iter().map(|s| model.overall_certainty(s)).product()
    }

    /// Certainty of the active step.
    pub fn step_certainty(&self) -> f64 {
        self.evaluator.model().overall_certainty(self.belief())
    }

    /// Move to the next step, if there is one.
    fn advance(&mut self) -> bool {
        if self.active + 1 >= self.steps.len() {
            return false;
        }
        self.active += 1;
        tracing::info!("Session {}: moving to step {}", self.id, self.active + 1);
        true
    }

    /// Score the active step and decide what to do next, moving through
    /// settled steps until a question is chosen or the last step is done.
    pub fn score(&mut self) -> Decision {
        self.phase = Phase::Scoring;
        self.pending = None;

        loop {
            let certainty = self.step_certainty();
            if certainty >= self.config.certainty_threshold {
                if self.advance() {
                    continue;
                }
                let certainty = self.certainty();
                tracing::info!("Session {}: certainty {:.3} reached", self.id, certainty);
                self.phase = Phase::ReadyToExecute;
                return Decision::Ready(TerminationReason::CertaintyReached { certainty });
            }
            if self.turn >= self.config.max_turns {
                tracing::warn!("Session {}: turn cap {} reached", self.id, self.config.max_turns);
                self.phase = Phase::Aborted;
                return Decision::Abort(TerminationReason::TurnCapReached { turns: self.turn });
            }
            match self.select(certainty) {
                Ok(decision) => return decision,
                Err(reason) => {
                    tracing::info!(
                        "Session {}: selector stopped at step {} ({:?})",
                        self.id,
                        self.active + 1,
                        reason
                    );
                    if self.advance() {
                        continue;
                    }
                    self.phase = Phase::ReadyToExecute;
                    return Decision::Ready(reason);
                }
            }
        }
    }

    /// Generate, score and select a question for the active step.
    fn select(&mut self, certainty: f64) -> std::result::Result<Decision, TerminationReason> {
        let belief = &self.steps[self.active];
        let questions: Vec<_> = generate(belief, &self.config)
            .into_iter()
            .map(|q| q.with_step(self.active))
            .collect();
        let scores: Vec<QuestionScore> = questions.iter().map(|q| self.evaluator.evaluate(q, belief)).collect();
        let scored = self.selector.score_all(questions, &scores, &self.stats);
        for s in &scored {
            tracing::debug!(
                "  {} evpi={:.3} dregret={:.3} n={} bonus={:.3} ucb={:.3}",
                s.question.key,
                s.evpi,
                s.delta_regret,
                s.visits,
                s.exploration,
                s.ucb
            );
        }

        let threshold = self.config.threshold_at(self.turn);
        match self.selector.select(&scored, &mut self.stats, self.turn) {
            Selection::Stop(reason) => Err(reason.into()),
            Selection::Ask(index) => {
                let selected = scored[index].clone();
                tracing::info!(
                    "Session {} turn {}: asking {} (ucb={:.3})",
                    self.id,
                    self.turn,
                    selected.question.key,
                    selected.ucb
                );
                self.pending = Some(PendingTurn {
                    scored,
                    selected: index,
                    threshold,
                    certainty_before: certainty,
                });
                self.phase = Phase::Asking;
                Ok(Decision::Ask(selected))
            }
        }
    }

    /// The question has been phrased and issued.
    pub fn mark_awaiting_answer(&mut self) {
        self.phase = Phase::AwaitingAnswer;
    }

    /// Apply an interpreted answer to the pending question.
    pub fn apply_answer(&mut self, phrasing: &str, answer: &str, observations: &[Observation]) -> ApplyReport {
        let mut report = ApplyReport::default();
        let belief = &mut self.steps[self.active];
        for observation in observations {
            report.merge(belief.apply_observation(observation));
        }
        if !report.widened.is_empty() {
            tracing::warn!("Session {}: widened beliefs {:?}", self.id, report.widened);
        }
        self.widen_events += report.widened.len() as u32;
        self.steps[self.active].record(QaExchange {
            question: phrasing.to_string(),
            answer: answer.to_string(),
            observations: observations.to_vec(),
        });
        self.finish_turn(phrasing, Some(answer), observations, report.widened.clone());
        report
    }

    /// The answer source declined; the turn still counts.
    pub fn decline(&mut self, phrasing: &str) {
        tracing::info!("Session {}: answer declined", self.id);
        self.finish_turn(phrasing, None, &[], Vec::new());
    }

    fn finish_turn(
        &mut self,
        phrasing: &str,
        answer: Option<&str>,
        observations: &[Observation],
        widened: Vec<String>,
    ) {
        let certainty_after = self.step_certainty();
        match self.pending.take() {
            Some(pending) => {
                let selected = &pending.scored[pending.selected];
                self.transcript.push(TurnRecord {
                    turn: self.turn,
                    question: selected.question.clone(),
                    phrasing: phrasing.to_string(),
                    answer: answer.map(str::to_string),
                    observations: observations.to_vec(),
                    evpi: selected.evpi,
                    delta_regret: selected.delta_regret,
                    ucb: selected.ucb,
                    threshold: pending.threshold,
                    certainty_before: pending.certainty_before,
                    certainty_after,
                    scored: pending.scored.clone(),
                    widened,
                    timestamp: Utc::now(),
                });
            }
            None => tracing::warn!("Session {}: answer applied without a pending question", self.id),
        }
        self.turn += 1;
        self.phase = Phase::Scoring;
    }

    /// Most probable call of every step, in order.
    pub fn best_calls(&self) -> Vec<ResolvedCall> {
        self.steps.iter().map(|s| s.most_probable().resolve()).collect()
    }

    /// Calls executed so far, in order.
    pub fn executions(&self) -> &[ExecutionOutcome] {
        &self.executions
    }

    pub fn record_execution(&mut self, outcome: ExecutionOutcome) {
        self.executions.push(outcome);
    }

    /// Re-widen arguments of `step` rejected at validation or execution so
    /// they are asked about again. That step becomes the active one.
    pub fn rewiden(&mut self, step: usize, tool: &str, arguments: &[String]) -> usize {
        let Some(belief) = self.steps.get_mut(step) else {
            tracing::warn!("Session {}: no step {} to re-widen", self.id, step + 1);
            return 0;
        };
        let reset = belief.widen_arguments(tool, arguments);
        self.active = step;
        tracing::warn!(
            "Session {}: re-widened {} belief(s) of {} at step {} after rejection of {:?}",
            self.id,
            reset,
            tool,
            step + 1,
            arguments
        );
        self.widen_events += reset as u32;
        self.validation_retries += 1;
        reset
    }

    /// Close the session and build its output record.
    pub fn into_outcome(mut self, status: SessionStatus, reason: TerminationReason) -> SessionOutcome {
        self.phase = match status {
            SessionStatus::Executed => Phase::Executed,
            SessionStatus::ReadyToExecute => Phase::ReadyToExecute,
            SessionStatus::Aborted => Phase::Aborted,
        };
        let model = self.evaluator.model();
        let certainty = self.certainty();
        let threshold = self.config.certainty_threshold;
        let unsettled = self.steps.iter().any(|s| model.overall_certainty(s) < threshold);
        let calls = self.best_calls();
        let alternatives = self
            .steps
            .iter()
            .enumerate()
            .flat_map(|(step, belief)| {
                belief.ranked().into_iter().skip(1).map(move |c| RankedCall {
                    step,
                    call: c.resolve(),
                    prior: c.prior,
                    certainty: model.call_certainty(c),
                })
            })
            .collect();
        let ground_truth = self.input.ground_truth.as_ref();

        tracing::info!(
            "Session {} finished: {:?} ({}) after {} turn(s), certainty {:.3}",
            self.id,
            status,
            reason,
            self.turn,
            certainty
        );

        SessionOutcome {
            session_id: self.id,
            input_id: self.input.id.clone(),
            request: self.input.request.clone(),
            status,
            low_confidence: status == SessionStatus::Aborted || unsettled,
            reason,
            matches_ground_truth: ground_truth.map(|gt| gt.matches(&calls)),
            argument_accuracy: ground_truth.map(|gt| gt.argument_accuracy(&calls)),
            calls,
            alternatives,
            certainty,
            turns: self.turn,
            questions_asked: self.stats.total(),
            widen_events: self.widen_events,
            validation_retries: self.validation_retries,
            executions: self.executions,
            transcript: self.transcript,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
