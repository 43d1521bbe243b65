// Event domain types
//
// Events are immutable and append-only: once written, no field is mutated.
// The `(tenant_id, idempotency_key)` pair is unique per tenant and is the
// final duplicate guard at the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::IngestError;

/// Payload key under which producers name the vendor involved in a failure.
pub const VENDOR_PAYLOAD_KEY: &str = "vendor";

/// Payload key under which producers report the error code.
pub const ERROR_CODE_PAYLOAD_KEY: &str = "error_code";

/// Hard cap on the serialized payload size.
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024;

/// An event submission as received from a producer, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct EventSubmission {
    /// Tenant submitting the event.
    pub tenant_id: Uuid,
    /// Workflow the event belongs to.
    pub workflow_id: Uuid,
    /// Dot-separated event type, e.g. `payment.failed`.
    pub event_type: String,
    /// Structured payload; `error_code` and `vendor` keys are interpreted.
    pub payload: serde_json::Value,
    /// Producer-chosen key making the submission idempotent per tenant.
    pub idempotency_key: String,
    /// When the failure occurred at the producer (RFC3339 UTC).
    pub occurred_at: DateTime<Utc>,
    /// Version of the producer's event schema.
    pub schema_version: String,
}

impl EventSubmission {
    /// Validate the submission shape.
    ///
    /// Schema enforcement is nominally upstream; this is the defensive floor
    /// the pipeline re-checks before touching the store.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.event_type.is_empty() || self.event_type.len() > 255 {
            return Err(IngestError::validation(
                "event_type must be 1-255 characters",
            ));
        }
        if self.idempotency_key.is_empty() || self.idempotency_key.len() > 255 {
            return Err(IngestError::validation(
                "idempotency_key must be 1-255 characters",
            ));
        }
        if self.schema_version.trim().is_empty() {
            return Err(IngestError::validation("schema_version must be present"));
        }
        let payload_len = serde_json::to_vec(&self.payload)
            .map(|b| b.len())
            .unwrap_or(usize::MAX);
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(IngestError::validation(format!(
                "payload exceeds {MAX_PAYLOAD_BYTES} bytes"
            )));
        }
        Ok(())
    }

    /// Vendor named by the payload, if any.
    pub fn vendor(&self) -> Option<&str> {
        self.payload
            .get(VENDOR_PAYLOAD_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Error code carried by the payload, if any.
    pub fn error_code(&self) -> Option<&str> {
        self.payload
            .get(ERROR_CODE_PAYLOAD_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// A persisted event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Event {
    /// Unique identifier for the event.
    pub id: Uuid,
    /// Tenant that submitted the event.
    pub tenant_id: Uuid,
    /// Workflow the event belongs to.
    pub workflow_id: Uuid,
    /// Dot-separated event type.
    pub event_type: String,
    /// Structured payload as submitted.
    pub payload: serde_json::Value,
    /// Producer-chosen idempotency key.
    pub idempotency_key: String,
    /// When the failure occurred at the producer.
    pub occurred_at: DateTime<Utc>,
    /// When the event was accepted by the pipeline.
    pub received_at: DateTime<Utc>,
    /// Correlation id propagated through every row written for the request.
    pub correlation_id: String,
    /// Vendor named by the payload, denormalized for gate lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Version of the producer's event schema.
    pub schema_version: String,
}

impl Event {
    /// Error code carried by the payload, if any.
    pub fn error_code(&self) -> Option<&str> {
        self.payload
            .get(ERROR_CODE_PAYLOAD_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Whether a submission created a new row or replayed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    /// A new event row was persisted.
    Accepted,
    /// The idempotency key had already been seen; the stored id is returned.
    Duplicate,
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// Successful outcome of an event submission.
///
/// A duplicate is success-shaped: the caller must treat it exactly like an
/// acceptance of the original submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SubmissionOutcome {
    /// Id of the persisted (or previously persisted) event.
    pub event_id: Uuid,
    /// Whether this submission was new or a replay.
    pub status: SubmissionStatus,
    /// Correlation id for the request.
    pub correlation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission(payload: serde_json::Value) -> EventSubmission {
        EventSubmission {
            tenant_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            event_type: "payment.failed".to_string(),
            payload,
            idempotency_key: "k-1".to_string(),
            occurred_at: Utc::now(),
            schema_version: "1.0.0".to_string(),
        }
    }

    #[test]
    fn valid_submission_passes() {
        assert!(submission(json!({"error_code": "timeout"})).validate().is_ok());
    }

    #[test]
    fn empty_event_type_is_rejected() {
        let mut s = submission(json!({}));
        s.event_type = String::new();
        assert!(s.validate().is_err());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let blob = "x".repeat(MAX_PAYLOAD_BYTES + 1);
        let s = submission(json!({ "blob": blob }));
        assert!(s.validate().is_err());
    }

    #[test]
    fn long_idempotency_key_is_rejected() {
        let mut s = submission(json!({}));
        s.idempotency_key = "k".repeat(256);
        assert!(s.validate().is_err());
    }

    #[test]
    fn vendor_and_error_code_are_extracted() {
        let s = submission(json!({"vendor": "stripe", "error_code": "timeout"}));
        assert_eq!(s.vendor(), Some("stripe"));
        assert_eq!(s.error_code(), Some("timeout"));
    }

    #[test]
    fn empty_vendor_string_counts_as_absent() {
        let s = submission(json!({"vendor": ""}));
        assert_eq!(s.vendor(), None);
    }
}
