use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{Job, JobPriority, JobRequest, JobStatus, SubmitOptions};

/// Body of a job submission.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub request: JobRequest,
    #[serde(default)]
    pub priority: JobPriority,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct JobActionResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClearJobsQuery {
    pub older_than_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ClearJobsResponse {
    pub removed: usize,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

fn api_error(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: error.into() }))
}

fn not_found(job_id: Uuid) -> (StatusCode, Json<ErrorResponse>) {
    api_error(StatusCode::NOT_FOUND, format!("job {job_id} not found"))
}

/// POST /api/v1/jobs: validate and queue a job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    body.request
        .validate()
        .map_err(|report| api_error(StatusCode::UNPROCESSABLE_ENTITY, report.to_string()))?;

    let job_id = state.engine.submit(
        body.request,
        SubmitOptions {
            priority: body.priority,
            max_retries: body.max_retries,
        },
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            status: JobStatus::Pending,
            message: "Job queued".to_string(),
        }),
    ))
}

/// GET /api/v1/jobs[?status=]
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    let jobs = match query.status.as_deref() {
        Some(raw) => {
            let status = JobStatus::from_str(raw)
                .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("unknown status '{raw}'")))?;
            state.engine.list_jobs_by_status(status)
        }
        None => state.engine.list_jobs(),
    };
    Ok(Json(jobs))
}

/// GET /api/v1/jobs/{job_id}
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> ApiResult<Json<Job>> {
    state
        .engine
        .get_job(job_id)
        .map(Json)
        .ok_or_else(|| not_found(job_id))
}

/// POST /api/v1/jobs/{job_id}/cancel: only pending jobs can be cancelled.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobActionResponse>> {
    if state.engine.cancel(job_id) {
        return Ok(Json(JobActionResponse {
            job_id,
            status: JobStatus::Cancelled,
        }));
    }
    match state.engine.get_job(job_id) {
        Some(job) => Err(api_error(
            StatusCode::CONFLICT,
            format!("job is {} and cannot be cancelled", job.status),
        )),
        None => Err(not_found(job_id)),
    }
}

/// POST /api/v1/jobs/{job_id}/retry: only failed jobs can be retried.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobActionResponse>> {
    if state.engine.retry(job_id) {
        let status = state
            .engine
            .get_job(job_id)
            .map_or(JobStatus::Pending, |job| job.status);
        return Ok(Json(JobActionResponse { job_id, status }));
    }
    match state.engine.get_job(job_id) {
        Some(job) => Err(api_error(
            StatusCode::CONFLICT,
            format!("job is {} and cannot be retried", job.status),
        )),
        None => Err(not_found(job_id)),
    }
}

/// DELETE /api/v1/jobs?older_than_secs=N: evict settled jobs.
pub async fn clear_old_jobs(
    State(state): State<AppState>,
    Query(query): Query<ClearJobsQuery>,
) -> Json<ClearJobsResponse> {
    let removed = state
        .engine
        .clear_old_jobs(Duration::from_secs(query.older_than_secs));
    Json(ClearJobsResponse { removed })
}
