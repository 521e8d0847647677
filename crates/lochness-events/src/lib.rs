use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Minimal event envelope (RFC3339 time).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    pub time: String,
    pub kind: String,
    pub payload: Value,
}

impl Envelope {
    /// Stamps `payload` with the current time.
    pub fn now(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            time: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            kind: kind.into(),
            payload,
        }
    }
}

/// A simple broadcast bus for JSON-serializable lifecycle notifications.
///
/// Publishing never blocks and never fails: with no subscribers the
/// envelope is dropped, and slow subscribers observe `Lagged`.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish<T: Serialize>(&self, kind: &str, payload: &T) {
        let val =
            serde_json::to_value(payload).unwrap_or_else(|_| serde_json::json!({"_ser":"error"}));
        if self.tx.send(Envelope::now(kind, val)).is_err() {
            tracing::trace!(kind, "bus publish without subscribers");
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Mirrors every envelope into the `lochness::events` tracing target until
/// the bus closes. Returns how many envelopes were written.
pub async fn journal(mut rx: broadcast::Receiver<Envelope>) -> u64 {
    let mut written = 0;
    loop {
        match rx.recv().await {
            Ok(env) => {
                tracing::info!(
                    target: "lochness::events",
                    kind = %env.kind,
                    time = %env.time,
                    payload = %env.payload,
                    "event"
                );
                written += 1;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(target: "lochness::events", skipped, "journal lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return written,
        }
    }
}
