//! Disambiguation Loop: drives sessions through ask / answer / execute.
//!
//! The synchronous [`Session`] does all the scoring. This module adds the
//! parts that wait on the outside world: phrasing a question, getting an
//! answer, interpreting it, and executing the final calls. Each of those is
//! bounded by a per-call timeout and retried with backoff; a session as a
//! whole is bounded by a session timeout and can be cancelled at any point.

use crate::collaborators::{Answer, AnswerSource, PhrasedQuestion, QuestionPhraser};
use crate::outcome::{SessionOutcome, SessionStatus, TerminationReason};
use crate::retry::with_retry;
use crate::selector::ScoredQuestion;
use crate::session::{Decision, Session};
use clarion_core::{
    ClarionConfig, ClarionError, ExecutionErrorKind, ExecutionOutcome, ResolvedCall, SessionInput, ToolExecutor,
    ToolRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

pub type SessionResult = Result<SessionOutcome, ClarionError>;

/// How a session ended, before it is turned into an output record.
#[derive(Debug)]
struct Finish {
    status: SessionStatus,
    reason: TerminationReason,
}

impl Finish {
    fn aborted(reason: TerminationReason) -> Self {
        Self {
            status: SessionStatus::Aborted,
            reason,
        }
    }
}

enum HandOff {
    Done(Finish),
    /// Beliefs were re-widened after a rejected call; score again.
    Rescore,
}

// ============================================================================
// DisambiguationLoop
// ============================================================================

pub struct DisambiguationLoop {
    registry: Arc<ToolRegistry>,
    phraser: Arc<dyn QuestionPhraser>,
    answers: Arc<dyn AnswerSource>,
    config: ClarionConfig,
}

impl DisambiguationLoop {
    pub fn new(
        registry: Arc<ToolRegistry>,
        phraser: Arc<dyn QuestionPhraser>,
        answers: Arc<dyn AnswerSource>,
        config: ClarionConfig,
    ) -> Self {
        Self {
            registry,
            phraser,
            answers,
            config,
        }
    }

    pub fn config(&self) -> &ClarionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Create a session. Configuration errors surface here, before any
    /// question is asked.
    pub fn start(&self, input: SessionInput) -> Result<Session, ClarionError> {
        Session::new(&self.registry, input, self.config.engine.clone())
    }

    /// Create and run a session in one step.
    pub async fn run_input(&self, input: SessionInput, cancel: watch::Receiver<bool>) -> SessionResult {
        let session = self.start(input)?;
        Ok(self.run(session, cancel).await)
    }

    /// Drive `session` to a terminal state.
    ///
    /// The session timeout and `cancel` abort from any state. Answers
    /// applied before that point are kept in the returned outcome.
    pub async fn run(&self, mut session: Session, mut cancel: watch::Receiver<bool>) -> SessionOutcome {
        let limit = Duration::from_secs(self.config.session.timeout_secs);
        let id = session.id();
        let finish = {
            let drive = self.drive(&mut session);
            tokio::pin!(drive);
            tokio::select! {
                finish = &mut drive => finish,
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!("Session {} timed out after {}s", id, limit.as_secs());
                    Finish::aborted(TerminationReason::Timeout)
                }
                _ = wait_cancelled(&mut cancel) => {
                    tracing::warn!("Session {} cancelled", id);
                    Finish::aborted(TerminationReason::Cancelled)
                }
            }
        };
        session.into_outcome(finish.status, finish.reason)
    }

    /// Run many independent sessions concurrently, at most
    /// `session.max_concurrent` at a time. Results keep input order.
    pub async fn run_many(
        self: Arc<Self>,
        inputs: Vec<SessionInput>,
        cancel: watch::Receiver<bool>,
    ) -> Vec<SessionResult> {
        let permits = Arc::new(Semaphore::new(self.config.session.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        let total = inputs.len();

        for (index, input) in inputs.into_iter().enumerate() {
            let engine = Arc::clone(&self);
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => engine.run_input(input, cancel).await,
                    Err(_) => Err(ClarionError::Cancelled),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<SessionResult>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::error!("Session task failed: {}", e),
            }
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(ClarionError::collaborator_permanent("session task", "task panicked"))))
            .collect()
    }

    async fn drive(&self, session: &mut Session) -> Finish {
        loop {
            match session.score() {
                Decision::Abort(reason) => return Finish::aborted(reason),
                Decision::Ask(scored) => {
                    if let Err(finish) = self.ask(session, scored).await {
                        return finish;
                    }
                }
                Decision::Ready(reason) => match self.hand_off(session, reason).await {
                    HandOff::Done(finish) => return finish,
                    HandOff::Rescore => continue,
                },
            }
        }
    }

    fn attempt_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.config.session.collaborator_timeout_secs))
    }

    /// One question/answer turn.
    async fn ask(&self, session: &mut Session, scored: ScoredQuestion) -> Result<(), Finish> {
        let retry = &self.config.retry;
        let phraser: &dyn QuestionPhraser = self.phraser.as_ref();
        let answers: &dyn AnswerSource = self.answers.as_ref();
        let question = scored.question;

        let text = {
            let (q, belief) = (&question, session.belief());
            with_retry(retry, phraser.name(), self.attempt_timeout(), move || phraser.phrase(q, belief))
                .await
                .map_err(|e| collaborator_failed(phraser.name(), e))?
        };
        session.mark_awaiting_answer();
        tracing::info!("Session {} asks: {}", session.id(), text);

        let phrased = PhrasedQuestion { text, question };
        let answer = {
            let (p, input) = (&phrased, session.input());
            with_retry(retry, answers.name(), self.attempt_timeout(), move || answers.answer(p, input))
                .await
                .map_err(|e| collaborator_failed(answers.name(), e))?
        };

        match answer {
            Answer::Declined => session.decline(&phrased.text),
            Answer::Text(reply) => {
                tracing::info!("Session {} answer: {}", session.id(), reply);
                let observations = {
                    let (r, q, belief) = (reply.as_str(), &phrased.question, session.belief());
                    with_retry(retry, phraser.name(), self.attempt_timeout(), move || {
                        phraser.interpret(r, q, belief)
                    })
                    .await
                    .map_err(|e| collaborator_failed(phraser.name(), e))?
                };
                tracing::debug!("Session {} observations: {:?}", session.id(), observations);
                session.apply_answer(&phrased.text, &reply, &observations);
            }
        }
        Ok(())
    }

    /// Validate the best call of every step, then execute them in order if
    /// every tool has an executor. Steps executed before a rejection are not
    /// executed again.
    async fn hand_off(&self, session: &mut Session, reason: TerminationReason) -> HandOff {
        let calls = session.best_calls();
        for (step, call) in calls.iter().enumerate() {
            let validation = self
                .registry
                .validate(call)
                .and_then(|_| session.steps()[step].most_probable().spec.validate_call(call));
            if let Err(err) = validation {
                return self.rejected(session, step, call, err);
            }
        }

        let executors: Option<Vec<Arc<dyn ToolExecutor>>> =
            calls.iter().map(|call| self.registry.executor(&call.tool)).collect();
        let Some(executors) = executors else {
            let tools: Vec<&str> = calls.iter().map(|c| c.tool.as_str()).collect();
            tracing::info!("Session {}: {:?} ready to execute ({})", session.id(), tools, reason);
            return HandOff::Done(Finish {
                status: SessionStatus::ReadyToExecute,
                reason,
            });
        };

        let done = session.executions().len();
        for (step, (call, executor)) in calls.iter().zip(&executors).enumerate().skip(done) {
            let outcome = match self.execute(executor.as_ref(), call).await {
                Ok(outcome) => outcome,
                Err(e) => return HandOff::Done(Finish::aborted(collaborator_reason(executor.name(), e))),
            };
            if !outcome.invalid_arguments.is_empty() {
                let err = ClarionError::Validation {
                    tool: call.tool.clone(),
                    arguments: outcome.invalid_arguments.clone(),
                    reason: outcome.content.clone(),
                };
                return self.rejected(session, step, call, err);
            }
            if outcome.is_error {
                tracing::warn!(
                    "Session {}: executor {} failed at step {}: {}",
                    session.id(),
                    executor.name(),
                    step + 1,
                    outcome.content
                );
                let message = outcome.content.clone();
                session.record_execution(outcome);
                return HandOff::Done(Finish::aborted(TerminationReason::CollaboratorFailed {
                    collaborator: executor.name().to_string(),
                    message,
                }));
            }
            tracing::info!("Session {}: executed {} (step {})", session.id(), call.tool, step + 1);
            session.record_execution(outcome);
        }

        HandOff::Done(Finish {
            status: SessionStatus::Executed,
            reason,
        })
    }

    /// Transient executor errors are retried; anything else is returned.
    async fn execute(&self, executor: &dyn ToolExecutor, call: &ResolvedCall) -> anyhow::Result<ExecutionOutcome> {
        with_retry(&self.config.retry, executor.name(), self.attempt_timeout(), move || async move {
            let outcome = executor.execute(call).await;
            if outcome.error_kind == Some(ExecutionErrorKind::Transient) {
                return Err(ClarionError::collaborator(executor.name(), outcome.content).into());
            }
            Ok(outcome)
        })
        .await
    }

    /// Re-widen the rejected arguments of `step` and score again, or give up
    /// once the retry allowance is spent.
    fn rejected(&self, session: &mut Session, step: usize, call: &ResolvedCall, err: ClarionError) -> HandOff {
        let (tool, arguments, reason) = match err {
            ClarionError::Validation { tool, arguments, reason } => (tool, arguments, reason),
            other => (call.tool.clone(), Vec::new(), other.to_string()),
        };
        tracing::warn!("Session {}: call to {} at step {} rejected: {}", session.id(), tool, step + 1, reason);

        // Only values that were actually chosen can be re-asked; a missing
        // required argument stays missing no matter how often we rescore.
        let chosen: Vec<String> = arguments
            .iter()
            .filter(|a| call.arguments.contains_key(a.as_str()))
            .cloned()
            .collect();
        let allowance = self.config.engine.max_validation_retries;
        if chosen.is_empty() || session.validation_retries() >= allowance {
            return HandOff::Done(Finish::aborted(TerminationReason::ValidationFailed {
                step,
                tool,
                arguments,
                reason,
            }));
        }
        session.rewiden(step, &tool, &chosen);
        HandOff::Rescore
    }
}

fn collaborator_reason(name: &str, error: anyhow::Error) -> TerminationReason {
    TerminationReason::CollaboratorFailed {
        collaborator: name.to_string(),
        message: format!("{:#}", error),
    }
}

fn collaborator_failed(name: &str, error: anyhow::Error) -> Finish {
    tracing::warn!("{} gave up: {:#}", name, error);
    Finish::aborted(collaborator_reason(name, error))
}

/// Resolves once `cancel` holds `true`. A dropped sender never cancels.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
