use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use super::{not_json, AppState};
use crate::{DeviceReport, IngestError};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/postData", post(handler))
}

/// Store an already-consolidated reading. Any field, timestamp or storage
/// problem is reported as a 500, matching what existing clients expect.
async fn handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    // ---
    let Ok(Json(body)) = payload else {
        return not_json();
    };

    match save_report(&state, body).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(json!({ "message": "Data saved successfully" })),
        )
            .into_response(),
        Err(e) => {
            error!("POST /postData - failed: {}", e);
            e.into_response()
        }
    }
}

async fn save_report(state: &AppState, body: Value) -> Result<(), IngestError> {
    // ---
    let report: DeviceReport =
        serde_json::from_value(body).map_err(|e| IngestError::Parse(e.to_string()))?;
    debug!(
        device = %report.device,
        power_unit = ?report.data.power.unit,
        power_accuracy = ?report.data.power.accuracy,
        "POST /postData - report received"
    );

    let record = report.into_record()?;
    let row = state.store.append(&record).await?;
    info!(device = %row.device, id = row.id, "Report stored");
    Ok(())
}
