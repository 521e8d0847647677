use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use lochness_core::Error;
use lochness_kernel::KernelError;
use lochness_protocol::ProblemDetails;

pub fn problem(status: StatusCode, detail: Option<String>, code: Option<&str>) -> Response {
    let title = status.canonical_reason().unwrap_or("Error");
    let mut body = ProblemDetails::new(status.as_u16(), title, detail);
    if let Some(code) = code {
        body = body.with_code(code);
    }
    (status, Json(body)).into_response()
}

pub fn bad_request(detail: impl Into<String>) -> Response {
    problem(
        StatusCode::BAD_REQUEST,
        Some(detail.into()),
        Some("validation_error"),
    )
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) | Error::UnsupportedType(_) => StatusCode::BAD_REQUEST,
        Error::AuthenticationRequired => StatusCode::UNAUTHORIZED,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn domain_error(err: &Error) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        tracing::error!(%err, "request failed");
    }
    problem(status, Some(err.to_string()), Some(err.code()))
}

/// Storage failures are logged in full and surfaced without internals.
pub fn kernel_error(err: &KernelError) -> Response {
    match err.domain() {
        Some(domain) => domain_error(domain),
        None => {
            tracing::error!(%err, "storage failure");
            problem(
                StatusCode::INTERNAL_SERVER_ERROR,
                Some("storage failure".into()),
                Some("internal_error"),
            )
        }
    }
}
