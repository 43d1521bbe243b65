// Typed rejection -> HTTP status mapping
//
// Every rejection carries {code, message, details, correlation_id}. The
// status classes are fixed by contract:
//
//   validation        400    rate_limited   429 (+ Retry-After)
//   tenant_inactive   400    breaker_open   503
//   not_found         404    internal       500
//   workflow_disabled 403    duplicate      (success, not an error)

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use faultline_core::{IngestError, RejectCode};
use faultline_coordinator::ReversalError;

/// Wire shape of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Code-specific details (e.g. `retry_after_seconds`).
    pub details: serde_json::Value,
    /// Correlation id for the request.
    pub correlation_id: String,
}

/// API-level error: a rejection plus the correlation id it happened under.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn from_ingest(err: IngestError, correlation_id: String) -> Self {
        let status = match err.code() {
            RejectCode::Validation | RejectCode::TenantInactive => StatusCode::BAD_REQUEST,
            RejectCode::NotFound => StatusCode::NOT_FOUND,
            RejectCode::WorkflowDisabled => StatusCode::FORBIDDEN,
            RejectCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RejectCode::BreakerOpen => StatusCode::SERVICE_UNAVAILABLE,
            RejectCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let retry_after = err.retry_after().map(|d| d.as_secs().max(1));
        let details = match (&err, retry_after) {
            (IngestError::RateLimited { key, .. }, Some(secs)) => json!({
                "key": key,
                "retry_after_seconds": secs,
            }),
            (IngestError::BreakerOpen { vendor }, _) => json!({ "vendor": vendor }),
            _ => json!({}),
        };

        Self {
            status,
            body: ErrorBody {
                code: err.code().as_str().to_string(),
                message: err.to_string(),
                details,
                correlation_id,
            },
            retry_after,
        }
    }

    pub fn from_reversal(err: ReversalError, correlation_id: String) -> Self {
        let (status, code) = match &err {
            ReversalError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ReversalError::NotReversible { .. } => (StatusCode::CONFLICT, "not_reversible"),
            ReversalError::AlreadyReversed => (StatusCode::CONFLICT, "already_reversed"),
            ReversalError::SupersededByLaterAction => (StatusCode::CONFLICT, "superseded"),
            ReversalError::ActionInFlight => (StatusCode::CONFLICT, "action_in_flight"),
            ReversalError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: err.to_string(),
                details: json!({}),
                correlation_id,
            },
            retry_after: None,
        }
    }

    pub fn internal(err: anyhow::Error, correlation_id: String) -> Self {
        tracing::error!(error = %err, "internal error");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody {
                code: "internal".to_string(),
                message: "internal error".to_string(),
                details: json!({}),
                correlation_id,
            },
            retry_after: None,
        }
    }

    pub fn not_found(what: &str, correlation_id: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                code: "not_found".to_string(),
                message: format!("{what} not found"),
                details: json!({}),
                correlation_id,
            },
            retry_after: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_mapping_matches_contract() {
        let cid = "c-1".to_string();
        assert_eq!(
            ApiError::from_ingest(IngestError::validation("bad"), cid.clone()).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from_ingest(IngestError::TenantInactive, cid.clone()).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from_ingest(IngestError::TenantNotFound, cid.clone()).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from_ingest(IngestError::workflow_disabled("off"), cid.clone()).status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from_ingest(
                IngestError::RateLimited {
                    key: "tenant:t".into(),
                    retry_after: Duration::from_secs(30),
                },
                cid.clone()
            )
            .status,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from_ingest(
                IngestError::BreakerOpen {
                    vendor: "v1".into()
                },
                cid
            )
            .status,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn rate_limit_rejection_carries_retry_after() {
        let err = ApiError::from_ingest(
            IngestError::RateLimited {
                key: "tenant:t".into(),
                retry_after: Duration::from_secs(12),
            },
            "c-1".to_string(),
        );
        assert_eq!(err.retry_after, Some(12));
        assert_eq!(err.body.details["retry_after_seconds"], 12);
    }

    #[test]
    fn sub_second_retry_after_rounds_up_to_one() {
        let err = ApiError::from_ingest(
            IngestError::RateLimited {
                key: "tenant:t".into(),
                retry_after: Duration::from_millis(200),
            },
            "c-1".to_string(),
        );
        assert_eq!(err.retry_after, Some(1));
    }
}
