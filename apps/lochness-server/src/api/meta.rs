use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use lochness_core::JobStatus;

use crate::{responses, AppState};

/// Liveness check with queue depth.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "Meta",
    responses(
        (status = 200, description = "Service healthy", body = crate::openapi::HealthOk)
    )
)]
pub async fn healthz(State(state): State<AppState>) -> Response {
    let kernel = state.kernel();
    let pending = kernel.count_by_status_async(JobStatus::Pending).await;
    let running = kernel.count_by_status_async(JobStatus::Running).await;
    match (pending, running) {
        (Ok(pending), Ok(running)) => {
            Json(json!({"ok": true, "pending": pending, "running": running})).into_response()
        }
        (Err(err), _) | (_, Err(err)) => responses::kernel_error(&err),
    }
}

/// Registered connector type tags and what each can do.
#[utoipa::path(
    get,
    path = "/api/v1/connectors/supported",
    tag = "Meta",
    responses(
        (status = 200, description = "Connector types", body = crate::openapi::ConnectorList)
    )
)]
pub async fn connectors_supported(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "connectors": state.registry().supported() }))
}

/// Route index, mostly for operators poking at a running instance.
#[utoipa::path(
    get,
    path = "/about",
    tag = "Meta",
    responses((status = 200, description = "Service metadata"))
)]
pub async fn about(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": state.endpoints(),
    }))
}
