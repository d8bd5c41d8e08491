//! Manual enrollment endpoint for operators.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use utoipa::ToSchema;

use super::AppState;
use crate::transport::SendOutcome;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub phone_number: String,
    pub course_id: i64,
    pub user_name: Option<String>,
    #[serde(default)]
    pub send_with_start_button: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrollResponse {
    pub success: bool,
    pub message: String,
    pub enrollment_id: i64,
    pub whatsapp_sent: bool,
    pub whatsapp_error: Option<String>,
}

/// Enroll a phone number into a course and deliver its first item, optionally
/// as an interactive Start prompt.
#[utoipa::path(post, path = "/api/tenants/{tenant_id}/enroll-user",
    request_body = EnrollRequest,
    responses(
        (status = 200, description = "Enrolled; first item delivery attempted", body = EnrollResponse),
        (status = 500, description = "Enrollment failed"),
    )
)]
pub async fn enroll_user(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
    Json(req): Json<EnrollRequest>,
) -> Response {
    let result = state
        .engine
        .enroll(
            tenant_id,
            &req.phone_number,
            req.user_name.as_deref(),
            req.course_id,
            req.send_with_start_button,
        )
        .await;
    match result {
        Ok(receipt) => {
            let whatsapp_error = match &receipt.send {
                SendOutcome::Failed(reason) => Some(reason.clone()),
                _ => None,
            };
            Json(EnrollResponse {
                success: true,
                message: "User enrolled successfully".to_string(),
                enrollment_id: receipt.enrollment_id,
                whatsapp_sent: receipt.send.is_sent(),
                whatsapp_error,
            })
            .into_response()
        }
        Err(e) => {
            error!(tenant_id, course_id = req.course_id, "enrollment failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
