use utoipa::{OpenApi, ToSchema};

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HealthOk {
    pub ok: bool,
    pub pending: i64,
    pub running: i64,
}

/// A job row as stored in the ledger.
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct JobDoc {
    pub job_id: i64,
    pub job_type: String,
    pub project_id: String,
    pub site_id: String,
    #[schema(nullable, value_type = Option<String>)]
    pub data_source_name: Option<String>,
    #[schema(nullable, value_type = Option<String>)]
    pub data_sink_name: Option<String>,
    #[schema(nullable, value_type = Option<String>)]
    pub requested_by: Option<String>,
    #[schema(example = "pending")]
    pub status: String,
    #[schema(value_type = Object)]
    pub job_metadata: serde_json::Value,
    pub created_at: String,
    #[schema(nullable, value_type = Option<String>)]
    pub started_at: Option<String>,
    #[schema(nullable, value_type = Option<String>)]
    pub finished_at: Option<String>,
    #[schema(nullable, value_type = Option<String>)]
    pub result: Option<String>,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct JobList {
    pub jobs: Vec<JobDoc>,
    /// Rows matching the filter, ignoring `limit` and `offset`.
    pub total: i64,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct SyncStatusList {
    #[schema(value_type = Vec<Object>)]
    pub statuses: Vec<serde_json::Value>,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct EventList {
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<serde_json::Value>,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct ConnectorList {
    #[schema(value_type = Vec<Object>)]
    pub connectors: Vec<serde_json::Value>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::meta::healthz,
        crate::api::meta::about,
        crate::api::meta::connectors_supported,
        crate::api::jobs::jobs_submit,
        crate::api::jobs::jobs_list,
        crate::api::jobs::jobs_get,
        crate::api::status::sync_status,
        crate::api::status::data_pulls,
        crate::api::status::data_pushes,
        crate::api::status::files,
        crate::api::events::events_sse,
        crate::api::spec::openapi_json,
    ),
    components(
        schemas(
            HealthOk,
            JobDoc,
            JobList,
            SyncStatusList,
            EventList,
            ConnectorList,
            lochness_protocol::ProblemDetails,
            lochness_protocol::JobSubmitRequest,
            lochness_protocol::JobSubmitResponse
        )
    ),
    tags(
        (name = "Meta", description = "Service metadata and health"),
        (name = "Jobs", description = "Job submission and ledger queries"),
        (name = "Status", description = "Provenance events and derived sync status"),
        (name = "Events", description = "Live lifecycle notifications"),
        (name = "Specs", description = "Generated API documents")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_job_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/jobs"));
        assert!(doc.paths.paths.contains_key("/api/v1/jobs/{job_id}"));
        assert!(doc
            .paths
            .paths
            .contains_key("/api/v1/projects/{project_id}/sites/{site_id}/sync-status"));
        assert!(doc.paths.paths.contains_key("/api/v1/events"));
    }
}
