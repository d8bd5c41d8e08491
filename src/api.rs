pub mod courses;
pub mod dashboard;
pub mod enrollments;
pub mod webhook;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::ledger::SqliteLedger;
use crate::tenant::TenantResolver;
use crate::utils::now_utc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub ledger: Arc<SqliteLedger>,
    pub tenants: Arc<dyn TenantResolver>,
    pub verify_token: String,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", get(webhook::verify).post(webhook::receive))
        .route("/health", get(health))
        .route(
            "/api/tenants/{tenant_id}/courses",
            get(courses::list_courses).post(courses::create_course),
        )
        .route(
            "/api/courses/{course_id}",
            get(courses::get_course)
                .put(courses::update_course)
                .delete(courses::delete_course),
        )
        .route("/api/courses/{course_id}/items", post(courses::add_item))
        .route(
            "/api/tenants/{tenant_id}/enroll-user",
            post(enrollments::enroll_user),
        )
        .route(
            "/api/tenants/{tenant_id}/active-users",
            get(dashboard::active_users),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .with_state(state)
}

#[utoipa::path(get, path = "/health", responses((status = 200, description = "Service is up")))]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "timestamp": now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
    }))
}
