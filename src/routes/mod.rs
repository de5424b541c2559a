use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json, Router};
use serde_json::json;

use crate::{ConsolidationBuffer, Config, ReadingStore};

mod consolidate;
mod get_data;
mod health;
mod post_data;

// ---

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    // ---
    pub store: Arc<dyn ReadingStore>,
    pub buffer: Arc<ConsolidationBuffer>,
    pub config: Config,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(consolidate::router())
        .merge(post_data::router())
        .merge(get_data::router())
        .merge(health::router())
        .with_state(state)
}

/// 400 response for bodies that are not valid JSON.
fn not_json() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "message": "Request body must be JSON" })),
    )
        .into_response()
}
