// Kill switch HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get},
    Json, Router,
};
use utoipa::ToSchema;
use uuid::Uuid;

use faultline_core::KillSwitch;
use faultline_storage::CreateKillSwitch;

use crate::correlation;
use crate::error::ApiError;
use crate::AppState;

/// Request to engage a kill switch
#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct EngageKillSwitchRequest {
    pub tenant_id: Uuid,
    /// Omit for a tenant-wide switch.
    pub workflow_id: Option<Uuid>,
    /// Operator-supplied reason, surfaced in rejections.
    pub reason: String,
    /// Identity of the operator engaging the switch.
    pub activated_by: String,
}

/// Query parameters for listing kill switches
#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct ListKillSwitchesParams {
    pub tenant_id: Uuid,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/kill-switches",
            get(list_kill_switches).post(engage_kill_switch),
        )
        .route("/v1/kill-switches/:switch_id", delete(release_kill_switch))
        .with_state(state)
}

/// POST /v1/kill-switches - Engage a kill switch
#[utoipa::path(
    post,
    path = "/v1/kill-switches",
    request_body = EngageKillSwitchRequest,
    responses(
        (status = 201, description = "Kill switch engaged", body = KillSwitch),
        (status = 409, description = "An active switch already covers this scope"),
        (status = 500, description = "Internal server error")
    ),
    tag = "kill-switches"
)]
pub async fn engage_kill_switch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EngageKillSwitchRequest>,
) -> Result<(StatusCode, Json<KillSwitch>), ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let row = state
        .db
        .engage_kill_switch(CreateKillSwitch {
            tenant_id: req.tenant_id,
            workflow_id: req.workflow_id,
            reason: req.reason,
            activated_by: req.activated_by,
        })
        .await
        .map_err(|e| ApiError::internal(e, correlation_id))?;

    Ok((StatusCode::CREATED, Json(row.into())))
}

/// GET /v1/kill-switches - List kill switches for a tenant
#[utoipa::path(
    get,
    path = "/v1/kill-switches",
    params(("tenant_id" = Uuid, Query, description = "Tenant to list switches for")),
    responses(
        (status = 200, description = "Kill switches, active and released", body = Vec<KillSwitch>)
    ),
    tag = "kill-switches"
)]
pub async fn list_kill_switches(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListKillSwitchesParams>,
) -> Result<Json<Vec<KillSwitch>>, ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let rows = state
        .db
        .list_kill_switches(params.tenant_id)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id))?;

    Ok(Json(rows.into_iter().map(KillSwitch::from).collect()))
}

/// DELETE /v1/kill-switches/{switch_id} - Release a kill switch
#[utoipa::path(
    delete,
    path = "/v1/kill-switches/{switch_id}",
    params(("switch_id" = Uuid, Path, description = "Switch to release")),
    responses(
        (status = 200, description = "Kill switch released", body = KillSwitch),
        (status = 404, description = "No active switch with this id")
    ),
    tag = "kill-switches"
)]
pub async fn release_kill_switch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(switch_id): Path<Uuid>,
) -> Result<Json<KillSwitch>, ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let row = state
        .db
        .release_kill_switch(switch_id)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id.clone()))?
        .ok_or_else(|| ApiError::not_found("active kill switch", correlation_id))?;

    Ok(Json(row.into()))
}
