//! Tool execution capability, attached per tool at registration time.
//!
//! The engine never talks to a real backend itself; it hands a fully
//! resolved call to whatever [`ToolExecutor`] was registered for the tool.

use crate::belief::ResolvedCall;
use serde::Serialize;

/// Classification of tool execution errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// Timeout, connection reset: worth retrying.
    Transient,
    /// Bad arguments, unsupported operation: retrying won't help.
    Permanent,
}

/// Structured result from a tool execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub content: String,
    pub is_error: bool,
    pub error_kind: Option<ExecutionErrorKind>,
    /// Arguments the backend rejected. Non-empty means the loop should
    /// re-widen these beliefs and keep asking.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invalid_arguments: Vec<String>,
}

impl ExecutionOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            error_kind: None,
            invalid_arguments: vec![],
        }
    }

    pub fn transient_error(msg: impl Into<String>) -> Self {
        Self {
            content: msg.into(),
            is_error: true,
            error_kind: Some(ExecutionErrorKind::Transient),
            invalid_arguments: vec![],
        }
    }

    pub fn permanent_error(msg: impl Into<String>) -> Self {
        Self {
            content: msg.into(),
            is_error: true,
            error_kind: Some(ExecutionErrorKind::Permanent),
            invalid_arguments: vec![],
        }
    }

    /// The backend refused specific argument values.
    pub fn rejected(msg: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            content: msg.into(),
            is_error: true,
            error_kind: Some(ExecutionErrorKind::Permanent),
            invalid_arguments: arguments,
        }
    }
}

/// Executes a resolved call against some backend.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;
    async fn execute(&self, call: &ResolvedCall) -> ExecutionOutcome;
}
