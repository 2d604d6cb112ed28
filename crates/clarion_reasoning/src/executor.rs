//! Validating stand-in executor for simulations and tests.

use async_trait::async_trait;
use clarion_core::{ClarionError, ExecutionOutcome, ResolvedCall, ToolExecutor, ToolSpec};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Accepts any call that passes validation against its spec and reports it
/// back as executed. Can be told to fail transiently a number of times
/// first.
pub struct MockExecutor {
    spec: Arc<ToolSpec>,
    transient_failures: AtomicU32,
}

impl MockExecutor {
    pub fn new(spec: Arc<ToolSpec>) -> Self {
        Self {
            spec,
            transient_failures: AtomicU32::new(0),
        }
    }

    pub fn failing_first(spec: Arc<ToolSpec>, failures: u32) -> Self {
        Self {
            spec,
            transient_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl ToolExecutor for MockExecutor {
    fn name(&self) -> &str {
        self.spec.name()
    }

    async fn execute(&self, call: &ResolvedCall) -> ExecutionOutcome {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return ExecutionOutcome::transient_error(format!("{} backend unavailable", self.spec.name()));
        }
        match self.spec.validate_call(call) {
            Ok(()) => {
                let rendered: Vec<String> = call.arguments.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                ExecutionOutcome::ok(format!("{}({})", call.tool, rendered.join(", ")))
            }
            Err(ClarionError::Validation { arguments, reason, .. }) => ExecutionOutcome::rejected(reason, arguments),
            Err(e) => ExecutionOutcome::permanent_error(e.to_string()),
        }
    }
}
