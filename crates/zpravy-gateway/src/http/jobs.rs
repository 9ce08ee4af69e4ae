//! Job endpoints: manual submission, snapshots and cancellation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use zpravy_core::{JobId, Page};
use zpravy_executor::CancelOutcome;
use zpravy_jobs::{Job, JobFilter, JobStatus};

use super::{api_error, default_limit, ApiResult};
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub source: Option<String>,
    pub status: Option<JobStatus>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Deserialize)]
pub struct SubmitJob {
    pub source: String,
}

/// GET /api/jobs: newest first, optionally filtered by source and status.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListJobsQuery>,
) -> ApiResult<Json<Value>> {
    let page = Page::new(q.limit, q.offset);
    let filter = JobFilter {
        source: q.source,
        status: q.status,
    };
    let jobs = state.store.list(&filter, page).map_err(api_error)?;
    Ok(Json(json!({
        "jobs": jobs,
        "limit": page.limit,
        "offset": page.offset,
    })))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state.store.get(&JobId::from(id)).map_err(api_error)?;
    Ok(Json(job))
}

/// POST /api/jobs: queue a manual job ahead of recurring work.
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitJob>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let job_id = state
        .scheduler
        .submit_manual(&body.source)
        .map_err(api_error)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))))
}

/// POST /api/jobs/all: one manual job per configured source.
pub async fn submit_all(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let job_ids = state.scheduler.submit_manual_all().map_err(api_error)?;
    info!(count = job_ids.len(), "manual jobs submitted for all sources");
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_ids": job_ids }))))
}

/// POST /api/jobs/{id}/cancel
///
/// 200 when the job was cancelled outright, 202 when its worker was
/// signalled and will record the cancellation itself.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = JobId::from(id);
    let outcome = state.executor.cancel(&id).map_err(api_error)?;
    let status = match outcome {
        CancelOutcome::Cancelled => StatusCode::OK,
        CancelOutcome::Signalled => StatusCode::ACCEPTED,
    };
    Ok((status, Json(json!({ "job_id": id, "outcome": outcome }))))
}
