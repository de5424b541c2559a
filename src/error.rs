//! Error taxonomy for the ingestion path.
//!
//! Every failure a request can hit maps onto one [`IngestError`] variant, and
//! each variant knows its HTTP status. Handlers return `Result<_, IngestError>`
//! and let [`IntoResponse`] render the `{message, error}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

// ---

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// Malformed body, missing field or out-of-range value supplied by the caller.
    #[error("invalid request: {0}")]
    ClientInput(String),

    /// Topic is not one of the six consolidated channels.
    #[error("unexpected topic: {0}")]
    UnexpectedTopic(String),

    /// Payload could not be turned into a numeric reading.
    #[error("could not parse reading: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl IngestError {
    // ---
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::ClientInput(_) | IngestError::UnexpectedTopic(_) => {
                StatusCode::BAD_REQUEST
            }
            IngestError::Parse(_) | IngestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();
        let body = match &self {
            IngestError::UnexpectedTopic(_) => json!({
                "message": "Unexpected topic",
                "error": self.to_string(),
            }),
            IngestError::ClientInput(_) => json!({
                "message": "Invalid request body",
                "error": self.to_string(),
            }),
            IngestError::Parse(_) | IngestError::Storage(_) => json!({
                "message": "Failed to save data",
                "error": self.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}
