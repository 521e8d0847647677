//! Append-only provenance facts emitted by connectors.
//!
//! Every event carries the time the connector observed the fact, not the time
//! it was written. Corrections are new events; nothing here is ever edited.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullEvent {
    pub project_id: String,
    pub site_id: String,
    pub subject_id: String,
    pub data_source_name: String,
    pub file_path: Option<String>,
    pub file_md5: Option<String>,
    pub pull_time_s: Option<f64>,
    pub pull_timestamp: DateTime<Utc>,
    pub pull_metadata: Value,
    pub job_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub project_id: String,
    pub site_id: String,
    pub subject_id: Option<String>,
    pub data_source_name: Option<String>,
    pub data_sink_id: i64,
    pub data_sink_name: String,
    pub data_sink_type: String,
    pub file_path: String,
    pub file_md5: String,
    pub push_time_s: f64,
    pub push_timestamp: DateTime<Utc>,
    pub push_metadata: Value,
    pub job_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePresenceEvent {
    pub project_id: String,
    pub site_id: String,
    pub subject_id: String,
    pub data_source_name: String,
    pub file_path: String,
    pub file_md5: Option<String>,
    pub file_size_mb: Option<f64>,
    pub m_time: DateTime<Utc>,
    pub job_id: Option<i64>,
}

/// An event as read back from the store, paired with its surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
    pub id: i64,
    #[serde(flatten)]
    pub event: T,
}

impl<T> Stored<T> {
    pub fn new(id: i64, event: T) -> Self {
        Self { id, event }
    }
}

/// Events destined for a single atomic append.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvenanceBatch {
    pub pulls: Vec<PullEvent>,
    pub pushes: Vec<PushEvent>,
    pub files: Vec<FilePresenceEvent>,
}

impl ProvenanceBatch {
    pub fn len(&self) -> usize {
        self.pulls.len() + self.pushes.len() + self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Job-scoped sink that connectors write their events into. Nothing reaches
/// the store until the scheduler takes the batch after a successful call, so
/// a connector that fails halfway leaves no trace.
#[derive(Debug, Clone)]
pub struct ProvenanceRecorder {
    job_id: Option<i64>,
    batch: Arc<Mutex<ProvenanceBatch>>,
}

impl ProvenanceRecorder {
    pub fn for_job(job_id: i64) -> Self {
        Self {
            job_id: Some(job_id),
            batch: Arc::default(),
        }
    }

    /// Recorder that does not stamp a job id (tests, ad-hoc imports).
    pub fn detached() -> Self {
        Self {
            job_id: None,
            batch: Arc::default(),
        }
    }

    pub fn job_id(&self) -> Option<i64> {
        self.job_id
    }

    fn lock(&self) -> MutexGuard<'_, ProvenanceBatch> {
        self.batch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_pull(&self, mut event: PullEvent) {
        event.job_id = event.job_id.or(self.job_id);
        self.lock().pulls.push(event);
    }

    pub fn record_push(&self, mut event: PushEvent) {
        event.job_id = event.job_id.or(self.job_id);
        self.lock().pushes.push(event);
    }

    pub fn record_file(&self, mut event: FilePresenceEvent) {
        event.job_id = event.job_id.or(self.job_id);
        self.lock().files.push(event);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains everything recorded so far.
    pub fn take(&self) -> ProvenanceBatch {
        std::mem::take(&mut *self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time;
    use serde_json::json;

    fn pull(subject: &str) -> PullEvent {
        PullEvent {
            project_id: "PRESCIENT".into(),
            site_id: "JE".into(),
            subject_id: subject.into(),
            data_source_name: "redcap_main".into(),
            file_path: None,
            file_md5: None,
            pull_time_s: Some(0.4),
            pull_timestamp: time::now(),
            pull_metadata: json!({}),
            job_id: None,
        }
    }

    #[test]
    fn recorder_stamps_job_id_and_drains() {
        let recorder = ProvenanceRecorder::for_job(7);
        let clone = recorder.clone();
        clone.record_pull(pull("JE00001"));
        recorder.record_pull(pull("JE00002"));
        assert_eq!(recorder.len(), 2);

        let batch = recorder.take();
        assert_eq!(batch.pulls.len(), 2);
        assert!(batch.pulls.iter().all(|p| p.job_id == Some(7)));
        assert!(recorder.is_empty());
    }

    #[test]
    fn explicit_job_id_is_preserved() {
        let recorder = ProvenanceRecorder::for_job(7);
        let mut event = pull("JE00001");
        event.job_id = Some(3);
        recorder.record_pull(event);
        assert_eq!(recorder.take().pulls[0].job_id, Some(3));
    }

    #[test]
    fn stored_serializes_flat() {
        let stored = Stored::new(11, pull("JE00001"));
        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["id"], json!(11));
        assert_eq!(value["subject_id"], json!("JE00001"));
    }
}
