use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{api_error, ApiResult};
use crate::app::AppState;

/// GET /health: liveness check, returns job counts by status.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let jobs = state.store.count_by_status().map_err(api_error)?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": jobs,
        "queued": state.executor.intake().len(),
        "active_workers": state.executor.active_workers(),
        "sources": state.scheduler.sources().len(),
    })))
}
