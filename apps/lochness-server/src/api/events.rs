use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use lochness_core::Error;
use lochness_events::Envelope;
use lochness_topics as topics;
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::{responses, AppState};

fn parse_prefixes(raw: Option<&String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn wanted(prefixes: &[String], kind: &str) -> bool {
    prefixes.is_empty() || prefixes.iter().any(|p| kind.starts_with(p.as_str()))
}

fn sse_event(env: &Envelope) -> SseEvent {
    let data = serde_json::to_string(env).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default().event(env.kind.clone()).data(data)
}

/// Server-Sent Events stream of lifecycle envelopes as they are published.
#[utoipa::path(
    get,
    path = "/api/v1/events",
    tag = "Events",
    params(
        ("prefix" = Option<String>, Query, description = "CSV of event kind prefixes to include")
    ),
    responses(
        (status = 200, description = "SSE stream of envelopes", content_type = "text/event-stream"),
        (status = 401, description = "Principal required", body = lochness_protocol::ProblemDetails)
    )
)]
pub async fn events_sse(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if super::principal(&headers).is_none() && state.require_principal() {
        return responses::domain_error(&Error::AuthenticationRequired);
    }
    let prefixes = parse_prefixes(q.get("prefix"));
    let hello = Envelope::now(
        topics::TOPIC_SERVICE_CONNECTED,
        json!({ "prefixes": prefixes }),
    );
    let live = BroadcastStream::new(state.bus().subscribe()).filter_map(move |item| match item {
        Ok(env) if wanted(&prefixes, &env.kind) => Some(env),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "event stream subscriber lagged");
            None
        }
    });
    let stream = tokio_stream::once(hello)
        .chain(live)
        .map(|env| Ok::<_, Infallible>(sse_event(&env)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_split_and_match() {
        let raw = "jobs., ,provenance.".to_string();
        let prefixes = parse_prefixes(Some(&raw));
        assert_eq!(prefixes, vec!["jobs.", "provenance."]);
        assert!(wanted(&prefixes, "jobs.completed"));
        assert!(!wanted(&prefixes, "service.start"));
        assert!(wanted(&[], "service.start"));
    }
}
