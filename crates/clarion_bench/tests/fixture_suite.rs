//! Runs the bundled scenario suite end to end with simulated answers.

use clarion_bench::{attach_mock_executors, load_scenarios, run_suite};
use clarion_core::{load_tool_definitions, ClarionConfig, ToolRegistry};
use clarion_reasoning::{DisambiguationLoop, GroundTruthSimulator, SessionStatus, TemplatePhraser};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data")
}

fn registry() -> ToolRegistry {
    let defs = load_tool_definitions(data_dir().join("tools.toml")).unwrap();
    let mut registry = ToolRegistry::from_definitions(defs).unwrap();
    attach_mock_executors(&mut registry).unwrap();
    registry
}

#[test]
fn test_fixtures_load() {
    let registry = registry();
    assert_eq!(registry.len(), 5);
    assert!(registry.get("resize_image").is_some());

    let scenarios = load_scenarios(data_dir().join("scenarios.json")).unwrap();
    assert_eq!(scenarios.len(), 7);
    assert!(scenarios.iter().all(|s| s.ground_truth.is_some()));

    let plan = scenarios.iter().find(|s| s.id.as_deref() == Some("convert-then-print")).unwrap();
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.ground_truth.as_ref().unwrap().calls().len(), 2);
}

#[test]
fn test_example_config_is_valid() {
    let config = ClarionConfig::load(data_dir().join("clarion.example.toml")).unwrap();
    assert_eq!(config.llm.provider, "template");
    assert_eq!(config.session.max_concurrent, 8);
}

#[tokio::test]
async fn test_bundled_suite() {
    let engine = Arc::new(DisambiguationLoop::new(
        Arc::new(registry()),
        Arc::new(TemplatePhraser::new()),
        Arc::new(GroundTruthSimulator::new()),
        ClarionConfig::default(),
    ));
    let scenarios = load_scenarios(data_dir().join("scenarios.json")).unwrap();
    let (_tx, rx) = watch::channel(false);
    let (report, _) = run_suite(engine, scenarios, rx).await;

    assert!(report.errors.is_empty(), "{}", report.render());
    assert_eq!(report.completed, 7);

    let by_id = |id: &str| {
        report
            .sessions
            .iter()
            .find(|s| s.input_id.as_deref() == Some(id))
            .unwrap_or_else(|| panic!("missing session {}", id))
    };
    for id in ["convert-format", "convert-or-export", "resize-both", "print-bounded", "message-channel"] {
        let session = by_id(id);
        assert_eq!(session.status, SessionStatus::Executed, "{}: {}", id, session.reason);
        assert_eq!(session.exact_match, Some(true), "{}", id);
        assert!(session.valid);
        assert_eq!(session.questions_asked, 1, "{}", id);
    }

    let plan = by_id("convert-then-print");
    assert_eq!(plan.status, SessionStatus::Executed, "{}", plan.reason);
    assert_eq!(plan.tools, vec!["convert_document".to_string(), "print_document".to_string()]);
    assert_eq!(plan.exact_match, Some(true));
    assert_eq!(plan.executed_steps, 2);
    assert_eq!(plan.questions_asked, 2);

    let unsupported = by_id("unsupported-format");
    assert_eq!(unsupported.status, SessionStatus::Aborted);
    assert_eq!(unsupported.exact_match, Some(false));
    assert!(!unsupported.valid);

    assert!((report.exact_match_rate - 6.0 / 7.0).abs() < 1e-9);
    assert!((report.abort_rate - 1.0 / 7.0).abs() < 1e-9);
}
