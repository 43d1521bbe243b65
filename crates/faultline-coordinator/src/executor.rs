// ActionExecutor seam
//
// The coordinator records and sequences remediation; actually re-running a
// workflow, paging on-call or undoing a side effect belongs to an external
// dispatcher behind this trait.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tracing::info;

use faultline_core::{Action, Incident};

/// Why an execution attempt failed.
#[derive(Debug, Error)]
#[error("action execution failed: {message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Executes one claimed action against the outside world.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Perform the action. The returned value is recorded on the action row
    /// as its result.
    async fn execute(
        &self,
        action: &Action,
        incident: &Incident,
    ) -> Result<serde_json::Value, ExecutionError>;
}

/// Default executor: acknowledges every action and logs it.
///
/// Escalations are considered dispatched once acknowledged here; retries and
/// reversals report what they would have driven. Production deployments swap
/// this for a dispatcher wired to the actual channels.
#[derive(Debug, Default)]
pub struct LoggingExecutor;

#[async_trait]
impl ActionExecutor for LoggingExecutor {
    async fn execute(
        &self,
        action: &Action,
        incident: &Incident,
    ) -> Result<serde_json::Value, ExecutionError> {
        info!(
            action_id = %action.id,
            incident_id = %incident.id,
            kind = %action.kind,
            attempt = action.attempt_number,
            "executing action"
        );
        Ok(serde_json::json!({
            "executor": "logging",
            "kind": action.kind.to_string(),
            "acknowledged": true,
        }))
    }
}

/// Test executor failing the first `fail_first` calls, succeeding after.
#[derive(Debug, Default)]
pub struct FailingExecutor {
    fail_first: u32,
    calls: AtomicU32,
}

impl FailingExecutor {
    pub fn new(fail_first: u32) -> Self {
        Self {
            fail_first,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for FailingExecutor {
    async fn execute(
        &self,
        _action: &Action,
        _incident: &Incident,
    ) -> Result<serde_json::Value, ExecutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            Err(ExecutionError::new(format!(
                "simulated failure on call {}",
                call + 1
            )))
        } else {
            Ok(serde_json::json!({"executor": "failing", "acknowledged": true}))
        }
    }
}
