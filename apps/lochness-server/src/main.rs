use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use lochness_topics as topics;
use serde_json::json;
use tracing::{error, info};

mod api;
mod app_state;
mod bootstrap;
mod openapi;
mod responses;
mod router;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Some(path) =
        bootstrap::ensure_openapi_export().context("failed to write LOCHNESS_OPENAPI_OUT")?
    {
        println!("{path}");
        return Ok(());
    }

    lochness_otel::init();
    let config = lochness_core::load_effective(None)?;
    let bootstrap::BootstrapOutput {
        router,
        state,
        background_tasks,
    } = bootstrap::build(&config)?;

    let bind = config.bind();
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address '{bind}'"))?;
    let bus = state.bus().clone();
    let app = bootstrap::attach_layers(router, state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "lochness-server listening");
    bus.publish(
        topics::TOPIC_SERVICE_START,
        &json!({"addr": addr.to_string(), "version": env!("CARGO_PKG_VERSION")}),
    );

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }

    info!("shutting down background tasks");
    background_tasks
        .shutdown_with_grace(Duration::from_secs(5))
        .await;
    bus.publish(topics::TOPIC_SERVICE_STOP, &json!({}));
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(%err, "SIGTERM handler unavailable; waiting for ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod http_tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use lochness_core::{Config, DataSource};
    use lochness_events::Bus;
    use serde_json::Value;
    use std::path::Path;
    use tempfile::tempdir;
    use tower::util::ServiceExt;

    fn test_config(state_dir: &Path) -> Config {
        let mut config = Config::default();
        config.storage.state_dir = Some(state_dir.display().to_string());
        config
    }

    fn app(config: &Config) -> (Router, AppState) {
        let state = bootstrap::build_state(config, Bus::new(64)).expect("state");
        let (router, endpoints) = router::build_router();
        let state = state.with_endpoints(endpoints);
        (bootstrap::attach_layers(router, state.clone()), state)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.expect("response");
        let status = resp.status();
        let bytes = resp.into_body().collect().await.expect("body").to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_job(body: Value, principal: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(router::paths::JOBS)
            .header("content-type", "application/json");
        if let Some(p) = principal {
            builder = builder.header(api::PRINCIPAL_HEADER, p);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn submit_returns_202_and_job_is_listed() {
        let dir = tempdir().unwrap();
        let (app, _) = app(&test_config(dir.path()));

        let (status, body) = send(
            &app,
            post_job(
                json!({"job_type": "data_pull", "project_id": "P", "site_id": "S1",
                       "data_source_name": "share"}),
                Some("alice"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id = body["job_id"].as_i64().expect("job_id");

        let (status, body) = send(&app, get(&format!("/api/v1/jobs/{job_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["requested_by"], "alice");
        assert_eq!(body["data_source_name"], "share");
        assert_eq!(body["job_metadata"], json!({}));

        let (status, body) = send(&app, get("/api/v1/jobs?project_id=P&status=pending")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn submit_with_missing_site_is_400() {
        let dir = tempdir().unwrap();
        let (app, _) = app(&test_config(dir.path()));
        let (status, body) = send(
            &app,
            post_job(json!({"job_type": "data_pull", "project_id": "P", "site_id": "  "}), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");

        let (status, _) = send(
            &app,
            post_job(
                json!({"job_type": "data_pull", "project_id": "P", "site_id": "S",
                       "job_metadata": [1, 2]}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&app, get("/api/v1/jobs")).await;
        assert_eq!(body["jobs"], json!([]));
    }

    #[tokio::test]
    async fn malformed_json_is_400_problem() {
        let dir = tempdir().unwrap();
        let (app, _) = app(&test_config(dir.path()));
        let req = Request::builder()
            .method("POST")
            .uri(router::paths::JOBS)
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn missing_principal_is_401_when_required() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.server.require_principal = Some(true);
        let (app, _) = app(&config);
        let job = json!({"job_type": "data_pull", "project_id": "P", "site_id": "S"});

        let (status, body) = send(&app, post_job(job.clone(), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "authentication_required");

        let (status, _) = send(&app, post_job(job, Some("svc-ingest"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn unknown_job_is_404_and_bad_status_filter_is_400() {
        let dir = tempdir().unwrap();
        let (app, _) = app(&test_config(dir.path()));
        let (status, body) = send(&app, get("/api/v1/jobs/4242")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);

        let (status, _) = send(&app, get("/api/v1/jobs?status=finished")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn healthz_reports_queue_depth() {
        let dir = tempdir().unwrap();
        let (app, _) = app(&test_config(dir.path()));
        let job = json!({"job_type": "refresh_metadata", "project_id": "P", "site_id": "S"});
        send(&app, post_job(job.clone(), None)).await;
        send(&app, post_job(job, None)).await;

        let (status, body) = send(&app, get(router::paths::HEALTHZ)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "pending": 2, "running": 0}));
    }

    #[tokio::test]
    async fn connectors_and_openapi_are_served() {
        let dir = tempdir().unwrap();
        let (app, _) = app(&test_config(dir.path()));
        let (status, body) = send(&app, get(router::paths::CONNECTORS_SUPPORTED)).await;
        assert_eq!(status, StatusCode::OK);
        let tags: Vec<_> = body["connectors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["type_tag"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(tags, vec!["directory", "fileshare"]);

        let (status, body) = send(&app, get(router::paths::SPEC_OPENAPI)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/v1/jobs"].is_object());
    }

    #[tokio::test]
    async fn executed_pull_shows_up_in_sync_status_and_listings() {
        let dir = tempdir().unwrap();
        let share = tempdir().unwrap();
        std::fs::create_dir_all(share.path().join("JE00001")).unwrap();
        std::fs::write(share.path().join("JE00001/a.csv"), "a").unwrap();
        std::fs::create_dir_all(share.path().join("JE00002")).unwrap();
        std::fs::write(share.path().join("JE00002/b.csv"), "b").unwrap();

        let mut config = test_config(dir.path());
        config.data_sources.push(DataSource {
            data_source_name: "share".into(),
            project_id: "P".into(),
            site_id: "S1".into(),
            data_source_type: "fileshare".into(),
            data_source_is_active: true,
            data_source_metadata: json!({"root": share.path().display().to_string()}),
        });
        let (app, state) = app(&config);

        let (status, _) = send(
            &app,
            post_job(
                json!({"job_type": "data_pull", "project_id": "P", "site_id": "S1",
                       "data_source_name": "share"}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let ran = state.scheduler().drain("test").await.expect("drain");
        assert_eq!(ran.len(), 1);

        let (status, body) = send(
            &app,
            get("/api/v1/projects/P/sites/S1/sync-status?group_by=subject"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let statuses = body["statuses"].as_array().unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s["pull_status"] == "Success"));
        assert!(statuses.iter().all(|s| s["push_status"] == "None"));

        let (_, body) = send(
            &app,
            get("/api/v1/projects/P/sites/S1/sync-status?subject_id=JE00003"),
        )
        .await;
        let statuses = body["statuses"].as_array().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0]["pull_status"], "None");
        assert_eq!(statuses[0]["pull_count"], 0);

        let (_, body) = send(&app, get("/api/v1/projects/P/sites/S1/data-pulls?limit=1")).await;
        assert_eq!(body["events"].as_array().map(Vec::len), Some(1));
        let (_, body) = send(
            &app,
            get("/api/v1/projects/P/sites/S1/files?subject_id=JE00002"),
        )
        .await;
        let files = body["events"].as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["subject_id"], "JE00002");
        let (_, body) = send(&app, get("/api/v1/projects/P/sites/S1/data-pushes")).await;
        assert_eq!(body["events"], json!([]));
    }

    #[tokio::test]
    async fn job_list_reports_unpaged_total() {
        let dir = tempdir().unwrap();
        let (app, _) = app(&test_config(dir.path()));
        for site in ["S1", "S2", "S3"] {
            let job = json!({"job_type": "refresh_metadata", "project_id": "P", "site_id": site});
            send(&app, post_job(job, None)).await;
        }

        let (status, body) = send(&app, get("/api/v1/jobs?limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["total"], 3);

        let (_, body) = send(&app, get("/api/v1/jobs?site_id=S2&offset=5")).await;
        assert_eq!(body["jobs"], json!([]));
        assert_eq!(body["total"], 1);
    }

    async fn next_sse_chunk(body: &mut Body) -> String {
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("frame");
        let data = frame.into_data().expect("data frame");
        String::from_utf8(data.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn event_stream_forwards_matching_envelopes() {
        let dir = tempdir().unwrap();
        let (app, state) = app(&test_config(dir.path()));
        let resp = app
            .clone()
            .oneshot(get("/api/v1/events?prefix=jobs."))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/event-stream");
        let mut body = resp.into_body();

        let hello = next_sse_chunk(&mut body).await;
        assert!(hello.contains("event: service.connected"), "{hello}");

        state.bus().publish(topics::TOPIC_SERVICE_START, &json!({}));
        let job = json!({"job_type": "refresh_metadata", "project_id": "P", "site_id": "S"});
        let (status, _) = send(&app, post_job(job, None)).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let next = next_sse_chunk(&mut body).await;
        assert!(next.contains("event: jobs.enqueued"), "{next}");
        assert!(next.contains("refresh_metadata"), "{next}");
    }

    #[tokio::test]
    async fn event_stream_requires_principal_when_configured() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.server.require_principal = Some(true);
        let (app, _) = app(&config);
        let (status, body) = send(&app, get(router::paths::EVENTS)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "authentication_required");
    }
}
