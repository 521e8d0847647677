use std::mem;

use axum::{
    handler::Handler,
    routing::{get, post},
    Router,
};

use crate::{api, AppState};

/// Builds the router while keeping an index of every registered route.
pub(crate) struct RouterBuilder {
    router: Router<AppState>,
    endpoints: Vec<String>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn route_get<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.endpoints.push(format!("GET {path}"));
        let router = mem::take(&mut self.router);
        self.router = router.route(path, get(handler));
        self
    }

    pub fn route_post<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.endpoints.push(format!("POST {path}"));
        let router = mem::take(&mut self.router);
        self.router = router.route(path, post(handler));
        self
    }

    pub fn build(self) -> (Router<AppState>, Vec<String>) {
        (self.router, self.endpoints)
    }
}

pub(crate) mod paths {
    pub const HEALTHZ: &str = "/healthz";
    pub const ABOUT: &str = "/about";
    pub const SPEC_OPENAPI: &str = "/spec/openapi.json";
    pub const JOBS: &str = "/api/v1/jobs";
    pub const JOBS_ID: &str = "/api/v1/jobs/{job_id}";
    pub const CONNECTORS_SUPPORTED: &str = "/api/v1/connectors/supported";
    pub const SYNC_STATUS: &str = "/api/v1/projects/{project_id}/sites/{site_id}/sync-status";
    pub const DATA_PULLS: &str = "/api/v1/projects/{project_id}/sites/{site_id}/data-pulls";
    pub const DATA_PUSHES: &str = "/api/v1/projects/{project_id}/sites/{site_id}/data-pushes";
    pub const FILES: &str = "/api/v1/projects/{project_id}/sites/{site_id}/files";
    pub const EVENTS: &str = "/api/v1/events";
}

pub(crate) fn build_router() -> (Router<AppState>, Vec<String>) {
    let mut builder = RouterBuilder::new();
    builder
        .route_get(paths::HEALTHZ, api::meta::healthz)
        .route_get(paths::ABOUT, api::meta::about)
        .route_get(paths::SPEC_OPENAPI, api::spec::openapi_json)
        .route_get(paths::CONNECTORS_SUPPORTED, api::meta::connectors_supported)
        .route_post(paths::JOBS, api::jobs::jobs_submit)
        .route_get(paths::JOBS, api::jobs::jobs_list)
        .route_get(paths::JOBS_ID, api::jobs::jobs_get)
        .route_get(paths::SYNC_STATUS, api::status::sync_status)
        .route_get(paths::DATA_PULLS, api::status::data_pulls)
        .route_get(paths::DATA_PUSHES, api::status::data_pushes)
        .route_get(paths::FILES, api::status::files)
        .route_get(paths::EVENTS, api::events::events_sse);
    builder.build()
}
