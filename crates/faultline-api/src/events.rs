// Event submission HTTP route

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use utoipa::ToSchema;

use faultline_core::{EventSubmission, SubmissionOutcome, SubmissionStatus};

use crate::correlation;
use crate::error::ApiError;
use crate::AppState;

/// Request to submit an event. The shape mirrors [`EventSubmission`]; the
/// DTO exists so the public contract can drift from the core type without
/// breaking producers.
#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct SubmitEventRequest {
    pub tenant_id: uuid::Uuid,
    pub workflow_id: uuid::Uuid,
    /// Dot-separated event type, e.g. `payment.failed`.
    #[schema(example = "payment.failed")]
    pub event_type: String,
    /// Structured payload; `error_code` and `vendor` keys are interpreted.
    pub payload: serde_json::Value,
    /// Unique per tenant; replays return the original event id.
    pub idempotency_key: String,
    /// When the failure occurred at the producer (RFC3339 UTC).
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    /// Producer schema version (semver).
    #[schema(example = "1.0.0")]
    pub schema_version: String,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/events", post(submit_event))
        .with_state(state)
}

/// POST /v1/events - Submit a workflow event
#[utoipa::path(
    post,
    path = "/v1/events",
    request_body = SubmitEventRequest,
    responses(
        (status = 202, description = "Event accepted (or idempotent replay)", body = SubmissionOutcome),
        (status = 400, description = "Validation failure or inactive tenant"),
        (status = 403, description = "Kill switch engaged"),
        (status = 404, description = "Tenant or workflow missing"),
        (status = 429, description = "Rate limit exceeded; Retry-After set"),
        (status = 503, description = "Vendor circuit breaker open"),
        (status = 500, description = "Transient failure; safe to retry")
    ),
    tag = "events"
)]
pub async fn submit_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SubmitEventRequest>,
) -> Result<(StatusCode, Json<SubmissionOutcome>), ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let submission = EventSubmission {
        tenant_id: req.tenant_id,
        workflow_id: req.workflow_id,
        event_type: req.event_type,
        payload: req.payload,
        idempotency_key: req.idempotency_key,
        occurred_at: req.occurred_at,
        schema_version: req.schema_version,
    };

    let outcome = state
        .pipeline
        .submit(submission, Some(correlation_id.clone()))
        .await
        .map_err(|e| ApiError::from_ingest(e, correlation_id))?;

    let status = match outcome.status {
        SubmissionStatus::Accepted => StatusCode::ACCEPTED,
        SubmissionStatus::Duplicate => StatusCode::OK,
    };

    Ok((status, Json(outcome)))
}
