use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("ineligible: {0}")]
    Ineligible(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Transient failures are worth retrying at the gateway boundary.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Unavailable(_))
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            DispatchError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            DispatchError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            DispatchError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            DispatchError::Expired(msg) => (StatusCode::GONE, msg.clone()),
            DispatchError::Cancelled(msg) => (StatusCode::GONE, msg.clone()),
            DispatchError::Ineligible(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            DispatchError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            DispatchError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
