use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use lochness_core::{Error, JobFilter, JobStatus, JobType, NewJob};
use lochness_protocol::{clamp_limit, JobListQuery, JobSubmitRequest, JobSubmitResponse};

use crate::{responses, AppState};

/// Enqueue a job for asynchronous execution.
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    tag = "Jobs",
    request_body = JobSubmitRequest,
    responses(
        (status = 202, description = "Accepted", body = JobSubmitResponse),
        (status = 400, description = "Invalid request", body = lochness_protocol::ProblemDetails),
        (status = 401, description = "Principal required", body = lochness_protocol::ProblemDetails)
    )
)]
pub async fn jobs_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<JobSubmitRequest>, JsonRejection>,
) -> Response {
    let requested_by = super::principal(&headers);
    if requested_by.is_none() && state.require_principal() {
        return responses::domain_error(&Error::AuthenticationRequired);
    }
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return responses::bad_request(rejection.body_text()),
    };
    let new_job = NewJob {
        job_type: req.job_type,
        project_id: req.project_id,
        site_id: req.site_id,
        data_source_name: req.data_source_name,
        data_sink_name: req.data_sink_name,
        job_metadata: req.job_metadata,
        requested_by,
    };
    match state.scheduler().submit(new_job).await {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(JobSubmitResponse { job_id })).into_response(),
        Err(err) => responses::kernel_error(&err),
    }
}

/// List jobs, newest first, with the unpaged match count.
#[utoipa::path(
    get,
    path = "/api/v1/jobs",
    tag = "Jobs",
    params(
        ("project_id" = Option<String>, Query),
        ("site_id" = Option<String>, Query),
        ("job_type" = Option<String>, Query),
        ("status" = Option<String>, Query),
        ("data_source_name" = Option<String>, Query),
        ("limit" = Option<i64>, Query, description = "Defaults to 100, capped at 1000"),
        ("offset" = Option<i64>, Query)
    ),
    responses(
        (status = 200, description = "Jobs", body = crate::openapi::JobList),
        (status = 400, description = "Invalid filter", body = lochness_protocol::ProblemDetails)
    )
)]
pub async fn jobs_list(
    State(state): State<AppState>,
    query: Result<Query<JobListQuery>, QueryRejection>,
) -> Response {
    let Query(q) = match query {
        Ok(q) => q,
        Err(rejection) => return responses::bad_request(rejection.body_text()),
    };
    let filter = match job_filter(q) {
        Ok(filter) => filter,
        Err(err) => return responses::domain_error(&err),
    };
    let kernel = state.kernel();
    let total = match kernel.count_async(filter.clone()).await {
        Ok(total) => total,
        Err(err) => return responses::kernel_error(&err),
    };
    match kernel.query_async(filter).await {
        Ok(jobs) => Json(json!({ "jobs": jobs, "total": total })).into_response(),
        Err(err) => responses::kernel_error(&err),
    }
}

/// Fetch one job.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{job_id}",
    tag = "Jobs",
    params(("job_id" = i64, Path)),
    responses(
        (status = 200, description = "Job", body = crate::openapi::JobDoc),
        (status = 404, description = "Unknown job", body = lochness_protocol::ProblemDetails)
    )
)]
pub async fn jobs_get(State(state): State<AppState>, Path(job_id): Path<i64>) -> Response {
    match state.kernel().get_async(job_id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => responses::domain_error(&Error::NotFound(job_id)),
        Err(err) => responses::kernel_error(&err),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn job_filter(q: JobListQuery) -> Result<JobFilter, Error> {
    let status = match non_blank(q.status) {
        Some(raw) => Some(
            JobStatus::from_slug(&raw)
                .ok_or_else(|| Error::validation(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };
    Ok(JobFilter {
        project_id: non_blank(q.project_id),
        site_id: non_blank(q.site_id),
        job_type: non_blank(q.job_type).map(|t| JobType::from_slug(&t)),
        status,
        data_source_name: non_blank(q.data_source_name),
        limit: clamp_limit(q.limit),
        offset: q.offset.unwrap_or(0).clamp(0, u32::MAX as i64) as u32,
    })
}
