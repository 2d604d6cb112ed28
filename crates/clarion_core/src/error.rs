use thiserror::Error;

/// Error taxonomy of the disambiguation engine.
///
/// `Config` is fatal at session creation. `Validation` and
/// `InconsistentAnswer` are recovered inside the loop by re-widening beliefs.
/// `Collaborator` is retried with backoff and, once exhausted, aborts only
/// the session that raised it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClarionError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation failed for '{tool}': {reason} [{}]", .arguments.join(", "))]
    Validation {
        tool: String,
        arguments: Vec<String>,
        reason: String,
    },

    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: String,
        message: String,
        retryable: bool,
    },

    #[error("answer '{value}' for '{argument}' is not represented in the current belief")]
    InconsistentAnswer { argument: String, value: String },

    #[error("session cancelled")]
    Cancelled,

    #[error("{0} timed out")]
    Timeout(String),
}

pub type Result<T, E = ClarionError> = std::result::Result<T, E>;

impl ClarionError {
    pub fn config(msg: impl Into<String>) -> Self {
        ClarionError::Config(msg.into())
    }

    /// A transient collaborator failure, eligible for retry.
    pub fn collaborator(collaborator: &str, message: impl Into<String>) -> Self {
        ClarionError::Collaborator {
            collaborator: collaborator.to_string(),
            message: message.into(),
            retryable: true,
        }
    }

    /// A collaborator failure that retrying will not fix.
    pub fn collaborator_permanent(collaborator: &str, message: impl Into<String>) -> Self {
        ClarionError::Collaborator {
            collaborator: collaborator.to_string(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ClarionError::Collaborator { retryable, .. } => *retryable,
            ClarionError::Timeout(_) => true,
            _ => false,
        }
    }
}
