use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use zpravy_core::TriggerId;
use zpravy_jobs::Trigger;
use zpravy_scheduler::RecurringTrigger;

use super::{api_error, ApiResult};
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterTrigger {
    pub source: String,
    pub trigger: Trigger,
}

/// GET /api/triggers
pub async fn list_triggers(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let triggers = state.scheduler.list_recurring().map_err(api_error)?;
    Ok(Json(json!({ "triggers": triggers })))
}

/// POST /api/triggers: idempotent per `(source, trigger)`.
pub async fn register_trigger(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterTrigger>,
) -> ApiResult<(StatusCode, Json<RecurringTrigger>)> {
    let trigger = state
        .scheduler
        .register_recurring(&body.source, &body.trigger)
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(trigger)))
}

/// DELETE /api/triggers/{id}
pub async fn remove_trigger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .scheduler
        .remove_recurring(&TriggerId::from(id.as_str()))
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}
