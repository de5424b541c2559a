use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::{error, info};

use super::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/getData", get(handler))
}

async fn handler(State(state): State<AppState>) -> Response {
    // ---
    match state.store.list_all().await {
        Ok(rows) => {
            info!("GET /getData - returning {} rows", rows.len());
            (StatusCode::OK, Json(rows)).into_response()
        }
        Err(e) => {
            error!("GET /getData - failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "message": "Failed to retrieve data",
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}
