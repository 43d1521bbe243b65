// Incident read HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use utoipa::ToSchema;
use uuid::Uuid;

use faultline_core::{Action, Decision, Incident, IncidentStatus};

use crate::correlation;
use crate::error::ApiError;
use crate::AppState;

/// Query parameters for listing incidents
#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct ListIncidentsParams {
    pub tenant_id: Uuid,
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

/// Request to close out an incident
#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct UpdateIncidentStatusRequest {
    /// Target status; only `resolved` and `ignored` are operator-settable.
    pub status: String,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/incidents", get(list_incidents))
        .route(
            "/v1/incidents/:incident_id",
            get(get_incident).patch(update_incident_status),
        )
        .route("/v1/incidents/:incident_id/actions", get(list_actions))
        .route("/v1/incidents/:incident_id/decisions", get(list_decisions))
        .with_state(state)
}

/// GET /v1/incidents - List incidents for a tenant
#[utoipa::path(
    get,
    path = "/v1/incidents",
    params(
        ("tenant_id" = Uuid, Query, description = "Tenant to list incidents for"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("limit" = Option<i64>, Query, description = "Max number of results (default 20)"),
        ("offset" = Option<i64>, Query, description = "Offset for pagination")
    ),
    responses(
        (status = 200, description = "List of incidents", body = Vec<Incident>),
        (status = 500, description = "Internal server error")
    ),
    tag = "incidents"
)]
pub async fn list_incidents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListIncidentsParams>,
) -> Result<Json<Vec<Incident>>, ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let status = match params.status.as_deref() {
        Some(raw) => Some(raw.parse::<IncidentStatus>().map_err(|e| {
            ApiError::from_ingest(
                faultline_core::IngestError::validation(e),
                correlation_id.clone(),
            )
        })?),
        None => None,
    };

    let rows = state
        .db
        .list_incidents(params.tenant_id, status, params.limit, params.offset)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id))?;

    Ok(Json(rows.into_iter().map(Incident::from).collect()))
}

/// GET /v1/incidents/{incident_id}
#[utoipa::path(
    get,
    path = "/v1/incidents/{incident_id}",
    params(("incident_id" = Uuid, Path, description = "Incident ID")),
    responses(
        (status = 200, description = "Incident found", body = Incident),
        (status = 404, description = "Incident not found")
    ),
    tag = "incidents"
)]
pub async fn get_incident(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(incident_id): Path<Uuid>,
) -> Result<Json<Incident>, ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let row = state
        .db
        .get_incident(incident_id)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id.clone()))?
        .ok_or_else(|| ApiError::not_found("incident", correlation_id))?;

    Ok(Json(row.into()))
}

/// PATCH /v1/incidents/{incident_id} - Resolve or ignore an incident
#[utoipa::path(
    patch,
    path = "/v1/incidents/{incident_id}",
    params(("incident_id" = Uuid, Path, description = "Incident ID")),
    request_body = UpdateIncidentStatusRequest,
    responses(
        (status = 200, description = "Incident closed out", body = Incident),
        (status = 400, description = "Status is not operator-settable"),
        (status = 404, description = "Incident not found"),
        (status = 409, description = "Incident is already terminal")
    ),
    tag = "incidents"
)]
pub async fn update_incident_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(incident_id): Path<Uuid>,
    Json(req): Json<UpdateIncidentStatusRequest>,
) -> Result<Json<Incident>, ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let target: IncidentStatus = req.status.parse().map_err(|e: String| {
        ApiError::from_ingest(
            faultline_core::IngestError::validation(e),
            correlation_id.clone(),
        )
    })?;
    if !matches!(target, IncidentStatus::Resolved | IncidentStatus::Ignored) {
        return Err(ApiError::from_ingest(
            faultline_core::IngestError::validation(
                "only resolved and ignored are operator-settable",
            ),
            correlation_id,
        ));
    }

    let current = state
        .db
        .get_incident(incident_id)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id.clone()))?
        .ok_or_else(|| ApiError::not_found("incident", correlation_id.clone()))?;
    let current_status = current
        .status
        .parse::<IncidentStatus>()
        .unwrap_or(IncidentStatus::New);
    if !current_status.is_open() {
        return Err(ApiError {
            status: axum::http::StatusCode::CONFLICT,
            body: crate::error::ErrorBody {
                code: "already_terminal".to_string(),
                message: format!("incident is already {current_status}"),
                details: serde_json::json!({}),
                correlation_id,
            },
            retry_after: None,
        });
    }

    let row = state
        .db
        .update_incident_status(incident_id, target)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id.clone()))?
        .ok_or_else(|| ApiError::not_found("incident", correlation_id))?;

    Ok(Json(row.into()))
}

/// GET /v1/incidents/{incident_id}/actions
#[utoipa::path(
    get,
    path = "/v1/incidents/{incident_id}/actions",
    params(("incident_id" = Uuid, Path, description = "Incident ID")),
    responses(
        (status = 200, description = "Actions for the incident", body = Vec<Action>)
    ),
    tag = "incidents"
)]
pub async fn list_actions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(incident_id): Path<Uuid>,
) -> Result<Json<Vec<Action>>, ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let rows = state
        .db
        .list_actions_for_incident(incident_id)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id))?;

    Ok(Json(rows.into_iter().map(Action::from).collect()))
}

/// GET /v1/incidents/{incident_id}/decisions
#[utoipa::path(
    get,
    path = "/v1/incidents/{incident_id}/decisions",
    params(("incident_id" = Uuid, Path, description = "Incident ID")),
    responses(
        (status = 200, description = "Decision audit trail for the incident", body = Vec<Decision>)
    ),
    tag = "incidents"
)]
pub async fn list_decisions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(incident_id): Path<Uuid>,
) -> Result<Json<Vec<Decision>>, ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let rows = state
        .db
        .list_decisions_for_incident(incident_id)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id))?;

    Ok(Json(rows.into_iter().map(Decision::from).collect()))
}
