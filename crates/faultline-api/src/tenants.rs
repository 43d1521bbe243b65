// Tenant and workflow CRUD HTTP routes (thin)

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch},
    Json, Router,
};
use utoipa::ToSchema;
use uuid::Uuid;

use faultline_core::{Tenant, Workflow};
use faultline_storage::{CreateTenant, CreateWorkflow};

use crate::correlation;
use crate::error::ApiError;
use crate::AppState;

/// Request to create a tenant
#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct CreateTenantRequest {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

/// Request to create a workflow under a tenant
#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

/// Request to flip an active flag
#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct SetActiveRequest {
    pub active: bool,
}

fn default_active() -> bool {
    true
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/tenants", get(list_tenants).post(create_tenant))
        .route("/v1/tenants/:tenant_id", patch(set_tenant_active))
        .route(
            "/v1/tenants/:tenant_id/workflows",
            get(list_workflows).post(create_workflow),
        )
        .route(
            "/v1/tenants/:tenant_id/workflows/:workflow_id",
            patch(set_workflow_active),
        )
        .with_state(state)
}

/// POST /v1/tenants - Create a tenant
#[utoipa::path(
    post,
    path = "/v1/tenants",
    request_body = CreateTenantRequest,
    responses((status = 201, description = "Tenant created", body = Tenant)),
    tag = "tenants"
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<Tenant>), ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let row = state
        .db
        .create_tenant(CreateTenant {
            name: req.name,
            active: req.active,
        })
        .await
        .map_err(|e| ApiError::internal(e, correlation_id))?;

    Ok((StatusCode::CREATED, Json(row.into())))
}

/// GET /v1/tenants - List tenants
#[utoipa::path(
    get,
    path = "/v1/tenants",
    responses((status = 200, description = "All tenants", body = Vec<Tenant>)),
    tag = "tenants"
)]
pub async fn list_tenants(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Tenant>>, ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let rows = state
        .db
        .list_tenants()
        .await
        .map_err(|e| ApiError::internal(e, correlation_id))?;

    Ok(Json(rows.into_iter().map(Tenant::from).collect()))
}

/// PATCH /v1/tenants/{tenant_id} - Activate or deactivate a tenant
#[utoipa::path(
    patch,
    path = "/v1/tenants/{tenant_id}",
    params(("tenant_id" = Uuid, Path, description = "Tenant ID")),
    request_body = SetActiveRequest,
    responses(
        (status = 200, description = "Tenant updated", body = Tenant),
        (status = 404, description = "Tenant not found")
    ),
    tag = "tenants"
)]
pub async fn set_tenant_active(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<SetActiveRequest>,
) -> Result<Json<Tenant>, ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let row = state
        .db
        .set_tenant_active(tenant_id, req.active)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id.clone()))?
        .ok_or_else(|| ApiError::not_found("tenant", correlation_id))?;

    Ok(Json(row.into()))
}

/// POST /v1/tenants/{tenant_id}/workflows - Create a workflow
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/workflows",
    params(("tenant_id" = Uuid, Path, description = "Owning tenant")),
    request_body = CreateWorkflowRequest,
    responses(
        (status = 201, description = "Workflow created", body = Workflow),
        (status = 404, description = "Tenant not found")
    ),
    tag = "tenants"
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    // Tenant existence is checked so the 404 is typed instead of a foreign
    // key error surfacing as 500.
    state
        .db
        .get_tenant(tenant_id)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id.clone()))?
        .ok_or_else(|| ApiError::not_found("tenant", correlation_id.clone()))?;

    let row = state
        .db
        .create_workflow(CreateWorkflow {
            tenant_id,
            name: req.name,
            active: req.active,
        })
        .await
        .map_err(|e| ApiError::internal(e, correlation_id))?;

    Ok((StatusCode::CREATED, Json(row.into())))
}

/// GET /v1/tenants/{tenant_id}/workflows - List workflows for a tenant
#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}/workflows",
    params(("tenant_id" = Uuid, Path, description = "Owning tenant")),
    responses((status = 200, description = "Workflows for the tenant", body = Vec<Workflow>)),
    tag = "tenants"
)]
pub async fn list_workflows(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<Workflow>>, ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let rows = state
        .db
        .list_workflows(tenant_id)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id))?;

    Ok(Json(rows.into_iter().map(Workflow::from).collect()))
}

/// PATCH /v1/tenants/{tenant_id}/workflows/{workflow_id} - Activate or
/// deactivate a workflow
#[utoipa::path(
    patch,
    path = "/v1/tenants/{tenant_id}/workflows/{workflow_id}",
    params(
        ("tenant_id" = Uuid, Path, description = "Owning tenant"),
        ("workflow_id" = Uuid, Path, description = "Workflow ID")
    ),
    request_body = SetActiveRequest,
    responses(
        (status = 200, description = "Workflow updated", body = Workflow),
        (status = 404, description = "Workflow not found")
    ),
    tag = "tenants"
)]
pub async fn set_workflow_active(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((tenant_id, workflow_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<SetActiveRequest>,
) -> Result<Json<Workflow>, ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    // Scope the lookup to the tenant before flipping the flag.
    state
        .db
        .get_workflow(tenant_id, workflow_id)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id.clone()))?
        .ok_or_else(|| ApiError::not_found("workflow", correlation_id.clone()))?;

    let row = state
        .db
        .set_workflow_active(workflow_id, req.active)
        .await
        .map_err(|e| ApiError::internal(e, correlation_id.clone()))?
        .ok_or_else(|| ApiError::not_found("workflow", correlation_id))?;

    Ok(Json(row.into()))
}
