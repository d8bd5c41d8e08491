//! Operator dashboard aggregation.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use super::AppState;

/// Per-enrollment progress rows for a tenant: participant, course, status and
/// responded-item counts.
#[utoipa::path(get, path = "/api/tenants/{tenant_id}/active-users", responses(
    (status = 200, description = "Enrollment progress rows, newest first"),
))]
pub async fn active_users(State(state): State<AppState>, Path(tenant_id): Path<i64>) -> Response {
    match state.ledger.active_users(tenant_id).await {
        Ok(users) => Json(json!({ "success": true, "users": users })).into_response(),
        Err(e) => {
            error!(tenant_id, "dashboard query failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
