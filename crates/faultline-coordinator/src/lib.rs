// Action coordination
//
// Turns decisions into remediation actions and drives them through the state
// machine. Exactly one action is in flight per incident (single-flight); the
// store's partial unique index enforces it and this crate maps the conflict
// to a suppression note in the decision audit.

pub mod coordinator;
pub mod executor;
pub mod scheduler;

pub use coordinator::{recommendation_for_kind, Coordinator, ReversalError};
pub use executor::{ActionExecutor, ExecutionError, FailingExecutor, LoggingExecutor};
pub use scheduler::{ActionScheduler, SchedulerConfig};
