//! Wire types exchanged between the HTTP surface and its callers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// RFC7807-style error payload used at service edges.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: Option<String>,
    pub instance: Option<String>,
    pub code: Option<String>,
}

impl ProblemDetails {
    pub fn new(status: u16, title: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            r#type: "about:blank".to_string(),
            title: title.into(),
            status,
            detail,
            instance: None,
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Job submission body. Empty strings are treated like missing values.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema, ToSchema)]
pub struct JobSubmitRequest {
    #[serde(default)]
    pub job_type: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub site_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_sink_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub job_metadata: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema, ToSchema)]
pub struct JobSubmitResponse {
    pub job_id: i64,
}

pub const DEFAULT_JOB_LIST_LIMIT: i64 = 100;
pub const MAX_JOB_LIST_LIMIT: i64 = 1000;

/// Query string accepted by the job listing endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema, ToSchema)]
pub struct JobListQuery {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub data_source_name: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// How sync-status records are grouped.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Subject,
    Source,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema, ToSchema)]
pub struct SyncStatusQuery {
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub data_source_name: Option<String>,
    #[serde(default)]
    pub group_by: Option<GroupBy>,
}

/// Filters for the provenance event listings. Newest events come first.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema, ToSchema)]
pub struct EventListQuery {
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub data_source_name: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Clamps a caller-supplied page size into `1..=MAX_JOB_LIST_LIMIT`.
pub fn clamp_limit(limit: Option<i64>) -> u32 {
    limit
        .unwrap_or(DEFAULT_JOB_LIST_LIMIT)
        .clamp(1, MAX_JOB_LIST_LIMIT) as u32
}
