use std::sync::Arc;

use anyhow::Context;
use lochness_core::{Catalog, Config, StaticCatalog};
use lochness_events::Bus;
use lochness_kernel::Kernel;
use lochness_scheduler::{spawn_supervised, Scheduler, SchedulerSettings, TaskManager};
use lochness_topics as topics;
use serde_json::json;

use crate::{router, AppState};

const BUS_CAPACITY: usize = 1024;

pub(crate) struct BootstrapOutput {
    pub router: axum::Router<AppState>,
    pub state: AppState,
    pub background_tasks: TaskManager,
}

/// Opens storage, builds the connector registry and catalog, and wires the
/// scheduler. Background work is not started here.
pub(crate) fn build_state(config: &Config, bus: Bus) -> anyhow::Result<AppState> {
    let registry = Arc::new(lochness_connectors::builtin_registry());
    bus.publish(
        topics::TOPIC_CONNECTORS_REGISTERED,
        &json!({ "connectors": registry.supported() }),
    );

    let (catalog, rejected) = StaticCatalog::build(
        &registry,
        config.data_sources.iter().cloned(),
        config.data_sinks.iter().cloned(),
    );
    for entry in &rejected {
        bus.publish(
            topics::TOPIC_CONNECTORS_REJECTED,
            &json!({"kind": entry.kind, "name": entry.name, "error": entry.error.to_string()}),
        );
    }
    tracing::info!(
        sources = catalog.source_count(),
        sinks = catalog.sink_count(),
        rejected = rejected.len(),
        "catalog loaded"
    );
    let catalog: Arc<dyn Catalog> = Arc::new(catalog);

    let keystore = config.keystore.build().context("building keystore")?;
    let state_dir = config.state_dir();
    let kernel = Kernel::open_with(&state_dir, config.busy_timeout())
        .with_context(|| format!("opening ledger in {}", state_dir.display()))?;
    tracing::info!(db = %kernel.db_path().display(), keystore = keystore.name(), "ledger ready");

    let scheduler = Scheduler::new(
        kernel,
        registry,
        catalog,
        keystore,
        bus,
        SchedulerSettings::from_config(config),
    );
    Ok(AppState::new(scheduler, config.require_principal()))
}

pub(crate) fn build(config: &Config) -> anyhow::Result<BootstrapOutput> {
    let state = build_state(config, Bus::new(BUS_CAPACITY))?;
    let (router, endpoints) = router::build_router();
    tracing::debug!(routes = endpoints.len(), "routes registered");
    let state = state.with_endpoints(endpoints);
    let mut background_tasks = state.scheduler().spawn();
    let bus = state.bus().clone();
    background_tasks.push(spawn_supervised("events.journal", move || {
        let rx = bus.subscribe();
        async move {
            let written = lochness_events::journal(rx).await;
            tracing::debug!(written, "event journal closed");
        }
    }));
    tracing::info!(tasks = ?background_tasks.names(), "background tasks started");
    Ok(BootstrapOutput {
        router,
        state,
        background_tasks,
    })
}

pub(crate) fn attach_layers(router: axum::Router<AppState>, state: AppState) -> axum::Router<()> {
    use tower_http::trace::TraceLayer;

    router
        .with_state::<()>(state)
        .layer(TraceLayer::new_for_http())
}

/// Writes the OpenAPI document to `LOCHNESS_OPENAPI_OUT` and reports the
/// path, so the binary can exit without serving.
pub(crate) fn ensure_openapi_export() -> Result<Option<String>, std::io::Error> {
    if let Ok(path) = std::env::var("LOCHNESS_OPENAPI_OUT") {
        export_openapi(&path)?;
        return Ok(Some(path));
    }
    Ok(None)
}

fn export_openapi(path: &str) -> Result<(), std::io::Error> {
    use utoipa::OpenApi;

    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = crate::openapi::ApiDoc::openapi()
        .to_pretty_json()
        .map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}
