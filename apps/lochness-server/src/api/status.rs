use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use lochness_core::{Granularity, StatusScope};
use lochness_protocol::{clamp_limit, EventListQuery, GroupBy, SyncStatusQuery};

use crate::{responses, AppState};

fn scope_for(
    project_id: String,
    site_id: String,
    subject_id: Option<String>,
    data_source_name: Option<String>,
) -> StatusScope {
    let mut scope = StatusScope::new(project_id, site_id);
    if let Some(name) = data_source_name.filter(|v| !v.trim().is_empty()) {
        scope = scope.source(name.trim());
    }
    if let Some(subject) = subject_id.filter(|v| !v.trim().is_empty()) {
        scope = scope.subject(subject.trim());
    }
    scope
}

/// Derived pull/push/file status, recomputed from the event logs on every call.
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/sites/{site_id}/sync-status",
    tag = "Status",
    params(
        ("project_id" = String, Path),
        ("site_id" = String, Path),
        ("subject_id" = Option<String>, Query),
        ("data_source_name" = Option<String>, Query),
        ("group_by" = Option<String>, Query, description = "subject | source")
    ),
    responses(
        (status = 200, description = "Sync status", body = crate::openapi::SyncStatusList),
        (status = 400, description = "Invalid query", body = lochness_protocol::ProblemDetails)
    )
)]
pub async fn sync_status(
    State(state): State<AppState>,
    Path((project_id, site_id)): Path<(String, String)>,
    query: Result<Query<SyncStatusQuery>, QueryRejection>,
) -> Response {
    let Query(q) = match query {
        Ok(q) => q,
        Err(rejection) => return responses::bad_request(rejection.body_text()),
    };
    let scope = scope_for(project_id, site_id, q.subject_id, q.data_source_name);
    let granularity = match q.group_by {
        Some(GroupBy::Subject) => Granularity::Subject,
        Some(GroupBy::Source) => Granularity::Source,
        None => scope.default_granularity(),
    };
    match state.kernel().sync_status_async(scope, granularity).await {
        Ok(statuses) => Json(json!({ "statuses": statuses })).into_response(),
        Err(err) => responses::kernel_error(&err),
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Pulls,
    Pushes,
    Files,
}

async fn list_events(
    state: AppState,
    stream: Stream,
    project_id: String,
    site_id: String,
    query: Result<Query<EventListQuery>, QueryRejection>,
) -> Response {
    let Query(q) = match query {
        Ok(q) => q,
        Err(rejection) => return responses::bad_request(rejection.body_text()),
    };
    let scope = scope_for(project_id, site_id, q.subject_id, q.data_source_name);
    let limit = Some(clamp_limit(q.limit));
    let kernel = state.kernel();
    let events = match stream {
        Stream::Pulls => kernel
            .pull_events_async(scope, limit)
            .await
            .and_then(|rows| Ok(serde_json::to_value(rows)?)),
        Stream::Pushes => kernel
            .push_events_async(scope, limit)
            .await
            .and_then(|rows| Ok(serde_json::to_value(rows)?)),
        Stream::Files => kernel
            .file_events_async(scope, limit)
            .await
            .and_then(|rows| Ok(serde_json::to_value(rows)?)),
    };
    match events {
        Ok(events) => Json(json!({ "events": events })).into_response(),
        Err(err) => responses::kernel_error(&err),
    }
}

/// Pull events for a site, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/sites/{site_id}/data-pulls",
    tag = "Status",
    params(
        ("project_id" = String, Path),
        ("site_id" = String, Path),
        ("subject_id" = Option<String>, Query),
        ("data_source_name" = Option<String>, Query),
        ("limit" = Option<i64>, Query)
    ),
    responses((status = 200, description = "Pull events", body = crate::openapi::EventList))
)]
pub async fn data_pulls(
    State(state): State<AppState>,
    Path((project_id, site_id)): Path<(String, String)>,
    query: Result<Query<EventListQuery>, QueryRejection>,
) -> Response {
    list_events(state, Stream::Pulls, project_id, site_id, query).await
}

/// Push events for a site, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/sites/{site_id}/data-pushes",
    tag = "Status",
    params(
        ("project_id" = String, Path),
        ("site_id" = String, Path),
        ("subject_id" = Option<String>, Query),
        ("data_source_name" = Option<String>, Query),
        ("limit" = Option<i64>, Query)
    ),
    responses((status = 200, description = "Push events", body = crate::openapi::EventList))
)]
pub async fn data_pushes(
    State(state): State<AppState>,
    Path((project_id, site_id)): Path<(String, String)>,
    query: Result<Query<EventListQuery>, QueryRejection>,
) -> Response {
    list_events(state, Stream::Pushes, project_id, site_id, query).await
}

/// File presence events for a site, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/sites/{site_id}/files",
    tag = "Status",
    params(
        ("project_id" = String, Path),
        ("site_id" = String, Path),
        ("subject_id" = Option<String>, Query),
        ("data_source_name" = Option<String>, Query),
        ("limit" = Option<i64>, Query)
    ),
    responses((status = 200, description = "File events", body = crate::openapi::EventList))
)]
pub async fn files(
    State(state): State<AppState>,
    Path((project_id, site_id)): Path<(String, String)>,
    query: Result<Query<EventListQuery>, QueryRejection>,
) -> Response {
    list_events(state, Stream::Files, project_id, site_id, query).await
}
