use std::fmt;

use crate::model::JobStatus;

/// Whether a connector failure is worth resubmitting unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network hiccups, timeouts, remote 5xx.
    Transient,
    /// Bad credentials, malformed configuration, remote 4xx.
    Permanent,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
    #[error("credential resolution failed for key '{key_name}': {reason}")]
    CredentialResolution { key_name: String, reason: String },
    #[error("connector execution failed ({class}): {detail}")]
    ConnectorExecution { class: FailureClass, detail: String },
    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: i64,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {0} not found")]
    NotFound(i64),
    #[error("stuck job timeout: running since {started_at} exceeded {timeout_ms}ms")]
    StuckJobTimeout {
        started_at: String,
        timeout_ms: u128,
    },
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Error::ConnectorExecution {
            class: FailureClass::Transient,
            detail: detail.into(),
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Error::ConnectorExecution {
            class: FailureClass::Permanent,
            detail: detail.into(),
        }
    }

    /// Stable machine-readable code used in problem payloads and job results.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::UnsupportedType(_) => "unsupported_type",
            Error::CredentialResolution { .. } => "credential_resolution_error",
            Error::ConnectorExecution { .. } => "connector_execution_error",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::NotFound(_) => "not_found",
            Error::StuckJobTimeout { .. } => "stuck_job_timeout",
            Error::AuthenticationRequired => "authentication_required",
            Error::Internal(_) => "internal_error",
        }
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Error::ConnectorExecution { class, .. } => Some(*class),
            Error::StuckJobTimeout { .. } => Some(FailureClass::Transient),
            Error::Validation(_)
            | Error::UnsupportedType(_)
            | Error::CredentialResolution { .. } => Some(FailureClass::Permanent),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::transient(format!("io: {err}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
