// Ingestion pipeline and incident management
//
// The pipeline validates a submission, runs the safety gates in order,
// persists the event and dispatches detection asynchronously. The incident
// manager folds events into incidents by fingerprint, invokes the classifier
// and hands decisions to the action coordinator.
//
// Key design decisions:
// - Gate order is the contract: idempotency, tenant, workflow/kill-switch,
//   rate limit, breaker, persist, dispatch. A later gate never runs after an
//   earlier one rejects.
// - Duplicates are success-shaped; the unique index is the final arbiter and
//   its violation maps back to the stored event id.
// - Classifier timeout/failure becomes an escalate recommendation; it never
//   propagates as an ingestion error.

pub mod classifier;
pub mod decisions;
pub mod incidents;
pub mod ingest;

pub use classifier::{classify_with_timeout, HttpClassifier, RuleBasedClassifier, StaticClassifier};
pub use decisions::DecisionRecorder;
pub use incidents::{is_failure_event, IncidentManager, IncidentManagerConfig};
pub use ingest::IngestionPipeline;
