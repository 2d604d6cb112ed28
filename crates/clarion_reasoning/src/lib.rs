pub mod collaborators;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod llm;
pub mod llm_phraser;
pub mod outcome;
pub mod parsing;
pub mod prompts;
pub mod providers;
pub mod questions;
pub mod retry;
pub mod selector;
pub mod session;
pub mod simulator;
pub mod template;

pub use collaborators::{Answer, AnswerSource, PhrasedQuestion, QuestionPhraser};
pub use engine::{DisambiguationLoop, SessionResult};
pub use evaluator::{Evaluator, QuestionScore};
pub use executor::MockExecutor;
pub use llm::{CompletionParams, LlmClient};
pub use llm_phraser::LlmPhraser;
pub use outcome::{RankedCall, SessionOutcome, SessionStatus, TerminationReason, TurnRecord};
pub use questions::{generate, QuestionCandidate, QuestionTarget};
pub use selector::{QuestionStats, ScoredQuestion, Selection, Selector, StopReason};
pub use session::{Decision, Phase, Session};
pub use simulator::{GroundTruthSimulator, LlmUserSimulator};
pub use template::TemplatePhraser;
