// Action reversal HTTP route

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use uuid::Uuid;

use faultline_core::Action;

use crate::correlation;
use crate::error::ApiError;
use crate::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/actions/:action_id/reverse", post(reverse_action))
        .with_state(state)
}

/// POST /v1/actions/{action_id}/reverse - Reverse a succeeded action
#[utoipa::path(
    post,
    path = "/v1/actions/{action_id}/reverse",
    params(("action_id" = Uuid, Path, description = "Action to reverse")),
    responses(
        (status = 201, description = "Reversal action created", body = Action),
        (status = 404, description = "Action not found"),
        (status = 409, description = "Action not reversible, already reversed, superseded, or another action in flight")
    ),
    tag = "actions"
)]
pub async fn reverse_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(action_id): Path<Uuid>,
) -> Result<(StatusCode, Json<Action>), ApiError> {
    let correlation_id = correlation::or_generate(&headers);

    let reversal = state
        .coordinator
        .reverse_action(action_id)
        .await
        .map_err(|e| ApiError::from_reversal(e, correlation_id))?;

    Ok((StatusCode::CREATED, Json(reversal)))
}
