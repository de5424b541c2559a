// src/routes/health.rs
//! Liveness and storage connectivity endpoints.
//!
//! - `GET /health` answers without touching anything, for container
//!   orchestrators and CI pipelines.
//! - `GET /test` runs the storage probe and reports whether the database is
//!   reachable.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Handle `GET /health`.
///
/// Returns a static JSON object; does not touch the database.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Handle `GET /test` by probing the storage gateway.
async fn db_check(State(state): State<AppState>) -> Response {
    // ---
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "message": "Connection to the database was successful!" })),
        )
            .into_response(),
        Err(e) => {
            error!("GET /test - database probe failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "message": "Connection to the database failed!",
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

/// Create a subrouter containing `/health` and `/test`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/test", get(db_check))
}
