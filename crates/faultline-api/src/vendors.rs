// Vendor HTTP routes (thin)

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use utoipa::ToSchema;

use faultline_core::Vendor;
use faultline_storage::CreateVendor;

use crate::correlation;
use crate::error::ApiError;
use crate::AppState;

/// Request to register a vendor
#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct CreateVendorRequest {
    pub name: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i32,
}

fn default_rate_limit() -> i32 {
    600
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/vendors", get(list_vendors).post(create_vendor))
        .with_state(state)
}

/// POST /v1/vendors - Register a vendor
#[utoipa::path(
    post,
    path = "/v1/vendors",
    request_body = CreateVendorRequest,
    responses(
        (status = 201, description = "Vendor registered", body = Vendor),
        (status = 500, description = "Internal server error")
    ),
    tag = "vendors"
)]
pub async fn create_vendor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateVendorRequest>,
) -> Result<(StatusCode, Json<Vendor>), ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let row = state
        .db
        .create_vendor(CreateVendor {
            name: req.name,
            rate_limit_per_minute: req.rate_limit_per_minute,
        })
        .await
        .map_err(|e| ApiError::internal(e, correlation_id))?;

    Ok((StatusCode::CREATED, Json(row.into())))
}

/// GET /v1/vendors - List vendors with their breaker snapshots
#[utoipa::path(
    get,
    path = "/v1/vendors",
    responses((status = 200, description = "All vendors", body = Vec<Vendor>)),
    tag = "vendors"
)]
pub async fn list_vendors(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Vendor>>, ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let rows = state
        .db
        .list_vendors()
        .await
        .map_err(|e| ApiError::internal(e, correlation_id))?;

    Ok(Json(rows.into_iter().map(Vendor::from).collect()))
}
