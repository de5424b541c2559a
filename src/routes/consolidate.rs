//! `POST /testPost`: single-topic ingestion from the MQTT bridge.
//!
//! Each request carries one quantity for one plug. The value is parsed, fed
//! into the consolidation buffer, and once the sixth topic for a device has
//! arrived the assembled record is written to storage.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::{not_json, AppState};
use crate::{IngestError, Topic, TopicMessage, UpdateOutcome};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/testPost", post(handler))
}

async fn handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    // ---
    let Ok(Json(body)) = payload else {
        debug!("POST /testPost - body is not JSON");
        return not_json();
    };

    match consolidate(&state, body).await {
        Ok(resp) => resp,
        Err(e) => {
            match &e {
                IngestError::ClientInput(_) | IngestError::UnexpectedTopic(_) => {
                    warn!("POST /testPost - rejected: {}", e)
                }
                _ => error!("POST /testPost - failed: {}", e),
            }
            e.into_response()
        }
    }
}

async fn consolidate(state: &AppState, body: Value) -> Result<Response, IngestError> {
    // ---
    let msg: TopicMessage =
        serde_json::from_value(body).map_err(|e| IngestError::ClientInput(e.to_string()))?;
    if msg.topic.is_empty() {
        return Err(IngestError::ClientInput("topic must not be empty".to_string()));
    }

    let observed_at = msg.observed_at()?;
    let device = msg
        .clientid
        .clone()
        .unwrap_or_else(|| state.config.unknown_device.clone());

    // Parse before touching the buffer so a bad payload never mutates it
    let value = msg.payload.to_reading(&msg.topic)?;
    debug!(device = %device, topic = %msg.topic, value, "POST /testPost - reading parsed");

    let outcome = state.buffer.observe(&device, &msg.topic, value, observed_at)?;
    retry_held(state, &device).await;

    let record = match outcome {
        UpdateOutcome::Pending { filled } => {
            debug!(device = %device, filled, "Waiting for more topics");
            return Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "message": "Data received, waiting for more data",
                    "device": device,
                    "filled": filled,
                    "required": Topic::COUNT,
                })),
            )
                .into_response());
        }
        UpdateOutcome::Completed(record) => record,
    };

    match state.store.append(&record).await {
        Ok(row) => {
            info!(device = %row.device, id = row.id, "Consolidated reading stored");
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "message": "Data consolidated and saved successfully",
                    "record": row,
                })),
            )
                .into_response())
        }
        Err(e) => {
            if state.config.restore_on_store_failure {
                warn!(device = %record.device, "Store failed, consolidated reading held for retry");
                state.buffer.hold(record);
            } else {
                error!(device = %record.device, ?record, "Store failed, consolidated reading dropped");
            }
            Err(e)
        }
    }
}

/// Write back readings held after an earlier failed write for `device`.
///
/// Held records are stored exactly as they were completed. On the first
/// failure the remaining records go back on hold in their original order.
async fn retry_held(state: &AppState, device: &str) {
    // ---
    let mut held = state.buffer.take_held(device).into_iter();
    while let Some(record) = held.next() {
        match state.store.append(&record).await {
            Ok(row) => info!(device = %row.device, id = row.id, "Held reading stored"),
            Err(e) => {
                warn!(device = %device, "Retry of held reading failed: {}", e);
                state.buffer.hold(record);
                held.for_each(|rest| state.buffer.hold(rest));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::routes::test_support::{body_json, state};

    const TOPICS: [(&str, &str); 6] = [
        ("/sonoff/power", "10"),
        ("/sonoff/current", "2"),
        ("/sonoff/apparent_power", "20"),
        ("/sonoff/voltage", "220"),
        ("/sonoff/power_factor", "0.9"),
        ("/sonoff/energy", "5"),
    ];

    fn message(topic: &str, payload: &str, clientid: Option<&str>) -> Value {
        // ---
        let mut msg = json!({
            "timestamp": 1714564800000_i64,
            "topic": topic,
            "payload": payload,
        });
        if let Some(id) = clientid {
            msg["clientid"] = json!(id);
        }
        msg
    }

    async fn post(state: &AppState, body: Value) -> Response {
        handler(State(state.clone()), Ok(Json(body))).await
    }

    #[tokio::test]
    async fn test_pending_then_created() {
        // ---
        let (state, store) = state(false);

        for (i, (topic, payload)) in TOPICS[..5].iter().enumerate() {
            let resp = post(&state, message(topic, payload, Some("D1"))).await;
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
            let body = body_json(resp).await;
            assert_eq!(body["filled"], i + 1);
            assert_eq!(body["device"], "D1");
        }

        let (topic, payload) = TOPICS[5];
        let resp = post(&state, message(topic, payload, Some("D1"))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["record"]["device"], "D1");
        assert_eq!(body["record"]["voltage_value"], 220.0);
        assert_eq!(body["record"]["power_factor_value"], 0.9);
        assert_eq!(body["record"]["timestamp"], "2024-05-01T12:00:00Z");

        assert_eq!(store.rows().len(), 1);
        assert!(state.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_missing_clientid_uses_unknown_device() {
        // ---
        let (state, _) = state(false);
        let resp = post(&state, message("/sonoff/power", "na", None)).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["device"], "unknown_device");
        assert_eq!(state.buffer.pending_devices()[0].device, "unknown_device");
    }

    #[tokio::test]
    async fn test_unexpected_topic_is_bad_request() {
        // ---
        let (state, _) = state(false);
        let resp = post(&state, message("/sonoff/temperature", "21", Some("D1"))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["message"], "Unexpected topic");
        assert!(state.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_missing_fields_are_bad_request() {
        // ---
        let (state, _) = state(false);
        let resp = post(&state, json!({"topic": "/sonoff/power", "payload": "1"})).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = post(&state, message("", "1", Some("D1"))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_payload_is_server_error() {
        // ---
        let (state, _) = state(false);
        let resp = post(&state, message("/sonoff/power", "abc", Some("D1"))).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(resp).await;
        assert_eq!(body["message"], "Failed to save data");
        assert!(body["error"].as_str().unwrap().contains("abc"));
        assert!(state.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_numeric_payload_is_accepted() {
        // ---
        let (state, _) = state(false);
        let body = json!({
            "timestamp": 1714564800000_i64,
            "topic": "/sonoff/voltage",
            "payload": 229.5,
            "clientid": "D9",
        });
        let resp = post(&state, body).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_store_failure_drops_record_by_default() {
        // ---
        let (state, store) = state(false);
        store.set_failing(true);

        for (topic, payload) in &TOPICS[..5] {
            post(&state, message(topic, payload, Some("D1"))).await;
        }
        let (topic, payload) = TOPICS[5];
        let resp = post(&state, message(topic, payload, Some("D1"))).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert!(state.buffer.is_empty());
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_holds_reading_when_enabled() {
        // ---
        let (state, store) = state(true);
        store.set_failing(true);

        for (topic, payload) in TOPICS {
            post(&state, message(topic, payload, Some("D1"))).await;
        }
        assert!(state.buffer.is_empty());
        assert_eq!(state.buffer.held_len(), 1);

        // Storage recovers; an hour later the first topic of a new reading arrives
        store.set_failing(false);
        let mut next = message("/sonoff/voltage", "240", Some("D1"));
        next["timestamp"] = json!(1714564800000_i64 + 3_600_000);
        let resp = post(&state, next).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["filled"], 1);

        // The held reading is written back unchanged
        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].device, "D1");
        assert_eq!(rows[0].timestamp.timestamp_millis(), 1714564800000);
        assert_eq!(rows[0].power_value, 10.0);
        assert_eq!(rows[0].voltage_value, 220.0);
        assert_eq!(rows[0].energy_value, 5.0);
        assert_eq!(state.buffer.held_len(), 0);
        assert_eq!(state.buffer.pending_devices()[0].filled, 1);
    }

    #[tokio::test]
    async fn test_held_reading_survives_repeated_failure() {
        // ---
        let (state, store) = state(true);
        store.set_failing(true);

        for (topic, payload) in TOPICS {
            post(&state, message(topic, payload, Some("D1"))).await;
        }
        let resp = post(&state, message("/sonoff/power", "11", Some("D1"))).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(state.buffer.held_len(), 1);

        // Other devices do not flush D1's held reading
        store.set_failing(false);
        post(&state, message("/sonoff/power", "1", Some("D2"))).await;
        assert!(store.rows().is_empty());

        post(&state, message("/sonoff/current", "3", Some("D1"))).await;
        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].power_value, 10.0);
        assert_eq!(rows[0].current_value, 2.0);
    }
}
