//! Job ledger domain types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Open job type tag. The three well-known kinds get their own variants;
/// anything else is carried through and rejected at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobType {
    DataPull,
    DataPush,
    RefreshMetadata,
    Other(String),
}

impl JobType {
    pub fn as_str(&self) -> &str {
        match self {
            JobType::DataPull => "data_pull",
            JobType::DataPush => "data_push",
            JobType::RefreshMetadata => "refresh_metadata",
            JobType::Other(tag) => tag.as_str(),
        }
    }

    pub fn from_slug(raw: &str) -> Self {
        match raw.trim() {
            "data_pull" => JobType::DataPull,
            "data_push" => JobType::DataPush,
            "refresh_metadata" => JobType::RefreshMetadata,
            other => JobType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(JobType::from_slug(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }

    pub fn from_slug(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "success" => Some(JobStatus::Success),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical resource a job operates on. Two jobs with the same type and an
/// equal scope never run at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub project_id: String,
    pub site_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_sink_name: Option<String>,
}

impl Scope {
    pub fn new(project_id: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            site_id: site_id.into(),
            data_source_name: None,
            data_sink_name: None,
        }
    }

    pub fn with_source(mut self, name: impl Into<String>) -> Self {
        self.data_source_name = Some(name.into());
        self
    }

    pub fn with_sink(mut self, name: impl Into<String>) -> Self {
        self.data_sink_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: i64,
    pub job_type: JobType,
    #[serde(flatten)]
    pub scope: Scope,
    pub requested_by: Option<String>,
    pub status: JobStatus,
    pub job_metadata: Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
}

impl Job {
    /// String field from `job_metadata`, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.job_metadata.get(key).and_then(Value::as_str)
    }
}

/// Enqueue request before validation.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub job_type: String,
    pub project_id: String,
    pub site_id: String,
    pub data_source_name: Option<String>,
    pub data_sink_name: Option<String>,
    pub job_metadata: Option<Value>,
    pub requested_by: Option<String>,
}

/// A request that passed [`NewJob::validate`]; the only thing the ledger accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidJob {
    pub job_type: JobType,
    pub scope: Scope,
    pub job_metadata: Value,
    pub requested_by: Option<String>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl NewJob {
    pub fn new(
        job_type: impl Into<String>,
        project_id: impl Into<String>,
        site_id: impl Into<String>,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            project_id: project_id.into(),
            site_id: site_id.into(),
            ..Default::default()
        }
    }

    pub fn source(mut self, name: impl Into<String>) -> Self {
        self.data_source_name = Some(name.into());
        self
    }

    pub fn sink(mut self, name: impl Into<String>) -> Self {
        self.data_sink_name = Some(name.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.job_metadata = Some(metadata);
        self
    }

    pub fn requested_by(mut self, principal: impl Into<String>) -> Self {
        self.requested_by = Some(principal.into());
        self
    }

    pub fn validate(self) -> Result<ValidJob> {
        let job_type = self.job_type.trim();
        if job_type.is_empty() {
            return Err(Error::validation("job_type is required"));
        }
        let project_id = self.project_id.trim();
        if project_id.is_empty() {
            return Err(Error::validation("project_id is required"));
        }
        let site_id = self.site_id.trim();
        if site_id.is_empty() {
            return Err(Error::validation("site_id is required"));
        }
        let job_metadata = match self.job_metadata {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(v @ Value::Object(_)) => v,
            Some(_) => return Err(Error::validation("job_metadata must be a JSON object")),
        };
        Ok(ValidJob {
            job_type: JobType::from_slug(job_type),
            scope: Scope {
                project_id: project_id.to_string(),
                site_id: site_id.to_string(),
                data_source_name: trimmed(self.data_source_name),
                data_sink_name: trimmed(self.data_sink_name),
            },
            job_metadata,
            requested_by: trimmed(self.requested_by),
        })
    }
}

/// Read-side filter for the job listing. Absent fields do not constrain.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFilter {
    pub project_id: Option<String>,
    pub site_id: Option<String>,
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub data_source_name: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            project_id: None,
            site_id: None,
            job_type: None,
            status: None,
            data_source_name: None,
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

/// Narrows which pending jobs a worker is willing to claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimFilter {
    #[serde(default)]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
}

/// Terminal outcome handed to `complete`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    status: JobStatus,
    result: String,
}

impl JobOutcome {
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Success,
            result: result.into(),
        }
    }

    pub fn failure(result: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            result: result.into(),
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self::failure(err.to_string())
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn result(&self) -> &str {
        &self.result
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Completed(Job),
    /// The job had already reached a terminal state; nothing was written.
    AlreadyTerminal(Job),
}

impl Completion {
    pub fn job(&self) -> &Job {
        match self {
            Completion::Completed(job) | Completion::AlreadyTerminal(job) => job,
        }
    }
}
