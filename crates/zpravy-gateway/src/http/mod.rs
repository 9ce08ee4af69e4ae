//! JSON control API.
//!
//! Handlers call the subsystems directly and map their errors through
//! [`ZpravyError`] so every failure body carries the same `{error, code}`
//! shape.

pub mod articles;
pub mod health;
pub mod jobs;
pub mod triggers;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::error;
use zpravy_core::{Page, ZpravyError};

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP status for a domain error.
pub fn status_for(e: &ZpravyError) -> StatusCode {
    match e {
        ZpravyError::JobNotFound { .. } | ZpravyError::TriggerNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        ZpravyError::InvalidTransition(_) => StatusCode::CONFLICT,
        ZpravyError::Config(_)
        | ZpravyError::UnknownSource { .. }
        | ZpravyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ZpravyError::Database(_)
        | ZpravyError::Serialization(_)
        | ZpravyError::Io(_)
        | ZpravyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert any subsystem error into an API error response.
pub fn api_error(e: impl Into<ZpravyError>) -> ApiError {
    let e = e.into();
    let status = status_for(&e);
    if status.is_server_error() {
        error!(code = e.code(), "request failed: {e}");
    }
    (status, Json(json!({ "error": e.to_string(), "code": e.code() })))
}

/// Default `limit` for the list endpoints.
pub fn default_limit() -> u32 {
    Page::default().limit
}
