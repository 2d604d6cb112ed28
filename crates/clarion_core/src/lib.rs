pub mod belief;
pub mod config;
pub mod error;
pub mod registry;
pub mod session;
pub mod tools;
pub mod uncertainty;
pub mod value;

pub use belief::{
    ApplyReport, ArgumentBelief, BeliefState, CandidateCall, Observation, QaExchange, ResolvedCall,
    CALL_SELECTION_KEY,
};
pub use config::{ClarionConfig, EngineConfig, LlmConfig, RetryPolicy, SessionConfig};
pub use error::{ClarionError, Result};
pub use registry::{
    load_tool_definitions, parse_tool_definitions, ArgumentSpec, ToolDefinition, ToolRegistry, ToolSpec,
};
pub use session::{
    initial_plan, ExpectedCall, ExtractedArgument, ExtractedCall, GroundTruth, PlanStep, SessionContext, SessionInput,
};
pub use tools::{ExecutionErrorKind, ExecutionOutcome, ToolExecutor};
pub use uncertainty::{normalized_entropy, CertaintyReport, UncertaintyModel};
pub use value::{ArgValue, Domain, WeightedValue};
