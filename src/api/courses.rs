//! Course and item management endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use utoipa::ToSchema;

use super::AppState;

const DEFAULT_PASSING_SCORE: i64 = 70;

fn internal_error(context: &str, e: anyhow::Error) -> Response {
    error!("{context}: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": context })),
    )
        .into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Course not found" })),
    )
        .into_response()
}

#[utoipa::path(get, path = "/api/tenants/{tenant_id}/courses", responses(
    (status = 200, description = "Courses for the tenant, newest first"),
))]
pub async fn list_courses(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
) -> Response {
    match state.ledger.courses_for_tenant(tenant_id).await {
        Ok(courses) => Json(courses).into_response(),
        Err(e) => internal_error("Failed to fetch courses", e),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCourseRequest {
    pub title: String,
    pub description: Option<String>,
    pub passing_score: Option<i64>,
}

#[utoipa::path(post, path = "/api/tenants/{tenant_id}/courses", responses(
    (status = 201, description = "Course created"),
))]
pub async fn create_course(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
    Json(req): Json<CreateCourseRequest>,
) -> Response {
    let passing_score = req.passing_score.unwrap_or(DEFAULT_PASSING_SCORE);
    match state
        .ledger
        .create_course(tenant_id, &req.title, req.description.as_deref(), passing_score)
        .await
    {
        Ok(course) => (StatusCode::CREATED, Json(course)).into_response(),
        Err(e) => internal_error("Failed to create course", e),
    }
}

#[utoipa::path(get, path = "/api/courses/{course_id}", responses(
    (status = 200, description = "Course with its items in delivery order"),
    (status = 404, description = "No such course"),
))]
pub async fn get_course(State(state): State<AppState>, Path(course_id): Path<i64>) -> Response {
    let course = match state.ledger.course(course_id).await {
        Ok(Some(course)) => course,
        Ok(None) => return not_found(),
        Err(e) => return internal_error("Failed to fetch course", e),
    };
    match state.ledger.course_items(course_id).await {
        Ok(items) => {
            let mut body = serde_json::to_value(&course).unwrap_or_default();
            body["items"] = serde_json::to_value(&items).unwrap_or_default();
            Json(body).into_response()
        }
        Err(e) => internal_error("Failed to fetch course", e),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCourseRequest {
    pub title: String,
    pub description: Option<String>,
    pub passing_score: i64,
}

#[utoipa::path(put, path = "/api/courses/{course_id}", responses(
    (status = 200, description = "Updated course"),
    (status = 404, description = "No such course"),
))]
pub async fn update_course(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
    Json(req): Json<UpdateCourseRequest>,
) -> Response {
    match state
        .ledger
        .update_course(course_id, &req.title, req.description.as_deref(), req.passing_score)
        .await
    {
        Ok(Some(course)) => Json(course).into_response(),
        Ok(None) => not_found(),
        Err(e) => internal_error("Failed to update course", e),
    }
}

#[utoipa::path(delete, path = "/api/courses/{course_id}", responses(
    (status = 200, description = "Course and dependents deleted"),
    (status = 404, description = "No such course"),
))]
pub async fn delete_course(State(state): State<AppState>, Path(course_id): Path<i64>) -> Response {
    match state.ledger.delete_course(course_id).await {
        Ok(true) => Json(json!({
            "success": true,
            "message": "Course deleted successfully"
        }))
        .into_response(),
        Ok(false) => not_found(),
        Err(e) => internal_error("Failed to delete course", e),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddItemRequest {
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: String,
    pub content_url: Option<String>,
    pub metadata: Option<String>,
    pub required: Option<bool>,
    pub item_order: Option<i64>,
}

#[utoipa::path(post, path = "/api/courses/{course_id}/items", responses(
    (status = 201, description = "Item appended to the course"),
    (status = 404, description = "No such course"),
))]
pub async fn add_item(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
    Json(req): Json<AddItemRequest>,
) -> Response {
    // tenant_id always comes from the course row, not the request
    let course = match state.ledger.course(course_id).await {
        Ok(Some(course)) => course,
        Ok(None) => return not_found(),
        Err(e) => return internal_error("Failed to add course item", e),
    };
    match state
        .ledger
        .add_item(
            &course,
            &req.item_type,
            &req.title,
            req.content_url.as_deref(),
            req.metadata.as_deref(),
            req.required.unwrap_or(true),
            req.item_order,
        )
        .await
    {
        Ok(item) => (StatusCode::CREATED, Json(item)).into_response(),
        Err(e) => internal_error("Failed to add course item", e),
    }
}
