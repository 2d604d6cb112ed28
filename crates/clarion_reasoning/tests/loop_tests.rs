//! Integration tests for the DisambiguationLoop.
//!
//! Sessions run end to end with the template phraser and scripted or
//! ground-truth answer sources, so no model server is needed.

use anyhow::Result;
use async_trait::async_trait;
use clarion_core::{
    ArgValue, ArgumentSpec, ClarionConfig, ClarionError, Domain, ExpectedCall, ExtractedArgument, ExtractedCall,
    GroundTruth, PlanStep, RetryPolicy, SessionInput, ToolRegistry, ToolSpec,
};
use clarion_reasoning::{
    Answer, AnswerSource, DisambiguationLoop, GroundTruthSimulator, MockExecutor, PhrasedQuestion, SessionStatus,
    TemplatePhraser, TerminationReason,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// Fixtures
// ============================================================================

/// Replays scripted answers in order. When the script runs out it either
/// declines or never answers.
struct ScriptedAnswers {
    script: Mutex<VecDeque<Answer>>,
    hang_when_empty: bool,
    asked: AtomicUsize,
}

impl ScriptedAnswers {
    fn new(answers: &[&str]) -> Self {
        Self {
            script: Mutex::new(answers.iter().map(|a| Answer::Text(a.to_string())).collect()),
            hang_when_empty: false,
            asked: AtomicUsize::new(0),
        }
    }

    fn hanging(answers: &[&str]) -> Self {
        Self {
            hang_when_empty: true,
            ..Self::new(answers)
        }
    }

    fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnswerSource for ScriptedAnswers {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn answer(&self, _question: &PhrasedQuestion, _input: &SessionInput) -> Result<Answer> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(answer) => Ok(answer),
            None if self.hang_when_empty => std::future::pending().await,
            None => Ok(Answer::Declined),
        }
    }
}

/// Fails a fixed number of times before answering.
struct FlakyAnswers {
    failures: AtomicUsize,
    permanent: bool,
}

#[async_trait]
impl AnswerSource for FlakyAnswers {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn answer(&self, _question: &PhrasedQuestion, _input: &SessionInput) -> Result<Answer> {
        if self.permanent {
            return Err(ClarionError::collaborator_permanent("flaky", "401 unauthorized").into());
        }
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ClarionError::collaborator("flaky", "503 unavailable").into());
        }
        Ok(Answer::Text("format: png".into()))
    }
}

fn convert_spec() -> ToolSpec {
    ToolSpec::new(
        "convert",
        "Convert the document",
        vec![ArgumentSpec::new("format", Domain::enumerated(["pptx", "doc", "png", "jpg"]))],
    )
    .unwrap()
}

fn two_argument_spec() -> ToolSpec {
    ToolSpec::new(
        "convert",
        "Convert the document",
        vec![
            ArgumentSpec::new("format", Domain::enumerated(["pptx", "doc", "png", "jpg"])).with_weight(2.0),
            ArgumentSpec::new("page", Domain::range(1.0, 8.0, 1.0)),
        ],
    )
    .unwrap()
}

fn export_spec() -> ToolSpec {
    ToolSpec::new(
        "export",
        "Export the document",
        vec![ArgumentSpec::new("format", Domain::enumerated(["pptx", "doc", "png", "jpg"]))],
    )
    .unwrap()
}

fn print_spec() -> ToolSpec {
    ToolSpec::new(
        "print",
        "Print the document",
        vec![ArgumentSpec::new("copies", Domain::range(1.0, 100.0, 1.0)).bounded_by("max_copies")],
    )
    .unwrap()
}

fn registry_with_executor(spec: ToolSpec) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let executor = Arc::new(MockExecutor::new(Arc::new(spec.clone())));
    registry.register(spec, Some(executor)).unwrap();
    registry
}

fn fast_config() -> ClarionConfig {
    ClarionConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 4,
            backoff_factor: 2.0,
        },
        ..ClarionConfig::default()
    }
}

fn engine(registry: ToolRegistry, answers: Arc<dyn AnswerSource>, config: ClarionConfig) -> DisambiguationLoop {
    DisambiguationLoop::new(Arc::new(registry), Arc::new(TemplatePhraser::new()), answers, config)
}

fn input_with_truth(request: &str, tool: &str, args: &[(&str, ArgValue)]) -> SessionInput {
    let mut input = SessionInput::new(request);
    input.ground_truth = Some(GroundTruth::single(expected(tool, args)));
    input
}

fn expected(tool: &str, args: &[(&str, ArgValue)]) -> ExpectedCall {
    ExpectedCall {
        tool: tool.to_string(),
        arguments: args.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
    }
}

/// Convert then print, one plan step each.
fn convert_then_print(request: &str) -> SessionInput {
    let mut input = SessionInput::new(request);
    input.steps = ["convert", "print"]
        .into_iter()
        .map(|tool| PlanStep {
            description: Some(format!("{} the document", tool)),
            candidates: vec![ExtractedCall {
                tool: tool.into(),
                prior: 1.0,
                arguments: Default::default(),
            }],
        })
        .collect();
    input
}

fn never_cancel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // Dropping the sender means "never cancelled".
    drop(tx);
    rx
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_single_uncertain_argument_resolves_in_one_question() {
    let engine = engine(
        registry_with_executor(convert_spec()),
        Arc::new(GroundTruthSimulator::new()),
        fast_config(),
    );
    let input = input_with_truth("convert the report", "convert", &[("format", ArgValue::from("png"))]);
    let outcome = engine.run_input(input, never_cancel()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Executed);
    assert!(matches!(outcome.reason, TerminationReason::CertaintyReached { .. }));
    assert_eq!(outcome.questions_asked, 1);
    assert_eq!(outcome.calls[0].arguments["format"], ArgValue::from("png"));
    assert!((outcome.certainty - 1.0).abs() < 1e-9);
    assert!(!outcome.low_confidence);
    assert_eq!(outcome.matches_ground_truth, Some(true));

    let turn = &outcome.transcript[0];
    assert!((turn.evpi - 1.0).abs() < 1e-9);
    assert!(turn.certainty_before.abs() < 1e-9);
    assert_eq!(turn.answer.as_deref(), Some("format: png"));
    assert_eq!(outcome.executions.len(), 1);
    assert_eq!(outcome.executions[0].content, "convert(format=png)");
}

#[tokio::test]
async fn test_selection_ambiguity_asks_which_call() {
    let mut registry = ToolRegistry::new();
    registry.register(convert_spec(), None).unwrap();
    registry.register(export_spec(), None).unwrap();

    let mut input = input_with_truth("get me a png of it", "export", &[("format", ArgValue::from("png"))]);
    for tool in ["convert", "export"] {
        input.candidates.push(ExtractedCall {
            tool: tool.into(),
            prior: 0.5,
            arguments: [("format".to_string(), ExtractedArgument::Value(ArgValue::from("png")))]
                .into_iter()
                .collect(),
        });
    }

    let engine = engine(registry, Arc::new(GroundTruthSimulator::new()), fast_config());
    let outcome = engine.run_input(input, never_cancel()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::ReadyToExecute);
    assert_eq!(outcome.calls.len(), 1);
    assert_eq!(outcome.calls[0].tool, "export");
    assert!(outcome.executions.is_empty());
    assert_eq!(outcome.transcript.len(), 1);
    assert!(outcome.transcript[0].question.asks_call_selection());
    assert!(outcome.transcript[0].certainty_before.abs() < 1e-9);
    assert_eq!(outcome.alternatives.len(), 1);
    assert_eq!(outcome.alternatives[0].call.tool, "convert");
}

#[tokio::test]
async fn test_inconsistent_answer_widens_then_recovers() {
    let answers = Arc::new(ScriptedAnswers::new(&["format: webp", "format: png"]));
    let engine = engine(registry_with_executor(convert_spec()), answers.clone(), fast_config());
    let outcome = engine.run_input(SessionInput::new("convert it"), never_cancel()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Executed);
    assert_eq!(outcome.calls[0].arguments["format"], ArgValue::from("png"));
    assert_eq!(outcome.transcript.len(), 2);
    assert_eq!(outcome.transcript[0].widened, vec!["convert.format".to_string()]);
    assert!(outcome.transcript[1].widened.is_empty());
    assert_eq!(outcome.validation_retries, 1);
    assert_eq!(answers.asked(), 2);
}

#[tokio::test]
async fn test_repeated_invalid_answers_abort_with_validation_failure() {
    let answers = Arc::new(ScriptedAnswers::new(&["format: webp", "format: webp", "format: webp"]));
    let engine = engine(registry_with_executor(convert_spec()), answers, fast_config());
    let outcome = engine.run_input(SessionInput::new("convert it"), never_cancel()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Aborted);
    assert!(outcome.low_confidence);
    match &outcome.reason {
        TerminationReason::ValidationFailed { step, tool, arguments, .. } => {
            assert_eq!(*step, 0);
            assert_eq!(tool, "convert");
            assert_eq!(arguments, &vec!["format".to_string()]);
        }
        other => panic!("Expected ValidationFailed, got {:?}", other),
    }
    // Every inconsistent answer widened exactly once.
    assert_eq!(outcome.transcript.len(), 3);
    for turn in &outcome.transcript {
        assert_eq!(turn.widened, vec!["convert.format".to_string()]);
    }
    assert_eq!(outcome.validation_retries, 2);
    // Best effort result is still returned.
    assert_eq!(outcome.calls[0].arguments["format"], ArgValue::from("webp"));
}

#[tokio::test]
async fn test_turn_cap_aborts_with_best_effort() {
    let mut config = fast_config();
    config.engine.max_turns = 2;
    let engine = engine(registry_with_executor(convert_spec()), Arc::new(ScriptedAnswers::new(&[])), config);
    let outcome = engine.run_input(SessionInput::new("convert it"), never_cancel()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Aborted);
    assert_eq!(outcome.reason, TerminationReason::TurnCapReached { turns: 2 });
    assert!(outcome.low_confidence);
    assert_eq!(outcome.calls[0].unresolved, vec!["format".to_string()]);
    assert!(outcome.transcript.iter().all(|t| t.answer.is_none()));
}

#[tokio::test]
async fn test_budget_exhausted_with_missing_argument_aborts() {
    let mut config = fast_config();
    config.engine.max_questions = 1;
    let engine = engine(registry_with_executor(convert_spec()), Arc::new(ScriptedAnswers::new(&[])), config);
    let outcome = engine.run_input(SessionInput::new("convert it"), never_cancel()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Aborted);
    assert_eq!(outcome.questions_asked, 1);
    match &outcome.reason {
        TerminationReason::ValidationFailed { reason, .. } => assert!(reason.contains("missing")),
        other => panic!("Expected ValidationFailed, got {:?}", other),
    }
    assert_eq!(outcome.validation_retries, 0);
}

// ============================================================================
// Context-bounded ranges
// ============================================================================

#[tokio::test]
async fn test_value_above_context_bound_is_asked_again() {
    let answers = Arc::new(ScriptedAnswers::new(&["copies: 50", "copies: 4"]));
    let engine = engine(registry_with_executor(print_spec()), answers.clone(), fast_config());
    let mut input = SessionInput::new("print some copies");
    input.context.insert("max_copies", serde_json::json!(10));
    let outcome = engine.run_input(input, never_cancel()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Executed);
    assert_eq!(outcome.calls[0].arguments["copies"], ArgValue::Number(4.0));
    assert_eq!(outcome.transcript.len(), 2);
    assert_eq!(outcome.transcript[0].widened, vec!["print.copies".to_string()]);
    assert_eq!(outcome.validation_retries, 1);
    assert_eq!(outcome.widen_events, 2);
    assert_eq!(answers.asked(), 2);
    assert_eq!(outcome.executions[0].content, "print(copies=4)");
}

#[tokio::test]
async fn test_context_bound_above_declared_max_keeps_declared_range() {
    let answers = Arc::new(ScriptedAnswers::new(&["copies: 500", "copies: 70"]));
    let engine = engine(registry_with_executor(print_spec()), answers.clone(), fast_config());
    let mut input = SessionInput::new("print some copies");
    input.context.insert("max_copies", serde_json::json!(1000));
    let outcome = engine.run_input(input, never_cancel()).await.unwrap();

    // 500 is outside the declared 1..100 even though the context allows it;
    // 70 is inside both.
    assert_eq!(outcome.status, SessionStatus::Executed);
    assert_eq!(outcome.calls[0].arguments["copies"], ArgValue::Number(70.0));
    assert_eq!(outcome.validation_retries, 1);
    assert_eq!(answers.asked(), 2);
}

// ============================================================================
// Multi-step plans
// ============================================================================

fn convert_and_print_registry() -> ToolRegistry {
    let mut registry = registry_with_executor(convert_spec());
    let print = print_spec();
    let executor = Arc::new(MockExecutor::new(Arc::new(print.clone())));
    registry.register(print, Some(executor)).unwrap();
    registry
}

#[tokio::test]
async fn test_plan_steps_execute_in_order() {
    let engine = engine(convert_and_print_registry(), Arc::new(GroundTruthSimulator::new()), fast_config());
    let mut input = convert_then_print("convert it and print a few");
    input.context.insert("max_copies", serde_json::json!(10));
    input.ground_truth = Some(GroundTruth::sequence(vec![
        expected("convert", &[("format", ArgValue::from("png"))]),
        expected("print", &[("copies", ArgValue::Number(3.0))]),
    ]));
    let outcome = engine.run_input(input, never_cancel()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Executed);
    let tools: Vec<&str> = outcome.calls.iter().map(|c| c.tool.as_str()).collect();
    assert_eq!(tools, vec!["convert", "print"]);
    let executed: Vec<&str> = outcome.executions.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(executed, vec!["convert(format=png)", "print(copies=3)"]);
    assert_eq!(outcome.matches_ground_truth, Some(true));
    assert_eq!(outcome.questions_asked, 2);
    assert_eq!(outcome.transcript[0].question.step, 0);
    assert_eq!(outcome.transcript[1].question.step, 1);
    assert!((outcome.certainty - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_failing_step_surfaces_its_arguments_before_anything_runs() {
    let answers = Arc::new(ScriptedAnswers::new(&["format: png", "copies: 50", "copies: 50", "copies: 50"]));
    let engine = engine(convert_and_print_registry(), answers, fast_config());
    let mut input = convert_then_print("convert it and print a few");
    input.context.insert("max_copies", serde_json::json!(10));
    let outcome = engine.run_input(input, never_cancel()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Aborted);
    match &outcome.reason {
        TerminationReason::ValidationFailed { step, tool, arguments, .. } => {
            assert_eq!(*step, 1);
            assert_eq!(tool, "print");
            assert_eq!(arguments, &vec!["copies".to_string()]);
        }
        other => panic!("Expected ValidationFailed, got {:?}", other),
    }
    assert!(outcome.executions.is_empty());
    assert_eq!(outcome.calls[0].arguments["format"], ArgValue::from("png"));
    assert_eq!(outcome.validation_retries, 2);
}

#[tokio::test]
async fn test_rejected_step_resumes_without_rerunning_earlier_steps() {
    // The print backend only handles up to 5 copies, fewer than the tool
    // declares, so the rejection comes from execution.
    let mut registry = registry_with_executor(convert_spec());
    let narrow = ToolSpec::new(
        "print",
        "Print the document",
        vec![ArgumentSpec::new("copies", Domain::range(1.0, 5.0, 1.0))],
    )
    .unwrap();
    registry
        .register(print_spec(), Some(Arc::new(MockExecutor::new(Arc::new(narrow)))))
        .unwrap();

    let answers = Arc::new(ScriptedAnswers::new(&["format: jpg", "copies: 8", "copies: 2"]));
    let engine = engine(registry, answers, fast_config());
    let outcome = engine
        .run_input(convert_then_print("convert and print"), never_cancel())
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Executed);
    let executed: Vec<&str> = outcome.executions.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(executed, vec!["convert(format=jpg)", "print(copies=2)"]);
    assert_eq!(outcome.validation_retries, 1);
    assert_eq!(outcome.transcript.len(), 3);
}

#[tokio::test]
async fn test_plan_without_every_executor_is_only_ready() {
    let mut registry = registry_with_executor(convert_spec());
    registry.register(print_spec(), None).unwrap();
    let answers = Arc::new(ScriptedAnswers::new(&["format: png", "copies: 2"]));
    let engine = engine(registry, answers, fast_config());
    let outcome = engine
        .run_input(convert_then_print("convert and print"), never_cancel())
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::ReadyToExecute);
    assert!(outcome.executions.is_empty());
    assert_eq!(outcome.calls.len(), 2);
}

// ============================================================================
// Collaborator failures
// ============================================================================

#[tokio::test]
async fn test_transient_answer_failures_are_retried() {
    let answers = Arc::new(FlakyAnswers {
        failures: AtomicUsize::new(2),
        permanent: false,
    });
    let engine = engine(registry_with_executor(convert_spec()), answers, fast_config());
    let outcome = engine.run_input(SessionInput::new("convert it"), never_cancel()).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Executed);
}

#[tokio::test]
async fn test_permanent_answer_failure_aborts_session() {
    let answers = Arc::new(FlakyAnswers {
        failures: AtomicUsize::new(0),
        permanent: true,
    });
    let engine = engine(registry_with_executor(convert_spec()), answers, fast_config());
    let outcome = engine.run_input(SessionInput::new("convert it"), never_cancel()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Aborted);
    match &outcome.reason {
        TerminationReason::CollaboratorFailed { collaborator, message } => {
            assert_eq!(collaborator, "flaky");
            assert!(message.contains("401"));
        }
        other => panic!("Expected CollaboratorFailed, got {:?}", other),
    }
    assert!(outcome.low_confidence);
}

#[tokio::test]
async fn test_transient_executor_failure_is_retried() {
    let spec = convert_spec();
    let mut registry = ToolRegistry::new();
    let executor = Arc::new(MockExecutor::failing_first(Arc::new(spec.clone()), 2));
    registry.register(spec, Some(executor)).unwrap();

    let engine = engine(registry, Arc::new(ScriptedAnswers::new(&["png"])), fast_config());
    let outcome = engine.run_input(SessionInput::new("convert it"), never_cancel()).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Executed);
}

#[tokio::test]
async fn test_unknown_tool_only_is_config_error() {
    let mut input = SessionInput::new("fly me to the moon");
    input.candidates.push(ExtractedCall {
        tool: "rocket".into(),
        prior: 1.0,
        arguments: Default::default(),
    });
    let engine = engine(registry_with_executor(convert_spec()), Arc::new(GroundTruthSimulator::new()), fast_config());
    let err = engine.run_input(input, never_cancel()).await.unwrap_err();
    assert!(matches!(err, ClarionError::Config(_)));
}

// ============================================================================
// Timeout and cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_session_timeout_aborts() {
    let mut config = fast_config();
    config.session.timeout_secs = 5;
    config.session.collaborator_timeout_secs = 600;
    let engine = engine(registry_with_executor(convert_spec()), Arc::new(ScriptedAnswers::hanging(&[])), config);
    let outcome = engine.run_input(SessionInput::new("convert it"), never_cancel()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Aborted);
    assert_eq!(outcome.reason, TerminationReason::Timeout);
    assert!(outcome.transcript.is_empty());
    assert_eq!(outcome.questions_asked, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_applied_answers() {
    let mut config = fast_config();
    config.session.collaborator_timeout_secs = 600;
    let engine = engine(
        registry_with_executor(two_argument_spec()),
        Arc::new(ScriptedAnswers::hanging(&["format: png"])),
        config,
    );
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let _ = tx.send(true);
    });

    let outcome = engine.run_input(SessionInput::new("convert page something"), rx).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Aborted);
    assert_eq!(outcome.reason, TerminationReason::Cancelled);
    assert_eq!(outcome.transcript.len(), 1);
    assert_eq!(outcome.calls[0].arguments["format"], ArgValue::from("png"));
    assert!(outcome.calls[0].unresolved.contains(&"page".to_string()));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_run_many_isolates_sessions() {
    let engine = Arc::new(engine(
        registry_with_executor(convert_spec()),
        Arc::new(GroundTruthSimulator::new()),
        fast_config(),
    ));

    let mut broken = SessionInput::new("fly me to the moon");
    broken.candidates.push(ExtractedCall {
        tool: "rocket".into(),
        prior: 1.0,
        arguments: Default::default(),
    });
    let inputs = vec![
        input_with_truth("a png please", "convert", &[("format", ArgValue::from("png"))]),
        broken,
        input_with_truth("a jpg please", "convert", &[("format", ArgValue::from("jpg"))]),
    ];

    let results = engine.run_many(inputs, never_cancel()).await;
    assert_eq!(results.len(), 3);

    let first = results[0].as_ref().unwrap();
    let third = results[2].as_ref().unwrap();
    assert!(matches!(results[1], Err(ClarionError::Config(_))));
    assert_eq!(first.calls[0].arguments["format"], ArgValue::from("png"));
    assert_eq!(third.calls[0].arguments["format"], ArgValue::from("jpg"));
    assert_eq!(first.status, SessionStatus::Executed);
    assert_eq!(third.status, SessionStatus::Executed);
    assert_ne!(first.session_id, third.session_id);
}
