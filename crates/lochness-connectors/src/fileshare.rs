//! `fileshare` source: every regular file under `root/<subject>/**` is one
//! pulled file.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lochness_core::time;
use lochness_core::{
    Capabilities, Connector, Error, FilePresenceEvent, ProvenanceRecorder, PullEvent,
    PullRequest, Result,
};
use regex::Regex;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::util::{bytes_to_mb, md5_file, root_dir};

pub const TYPE_TAG: &str = "fileshare";
const DEFAULT_SUBJECT_PATTERN: &str = "^[A-Za-z0-9_-]+$";

#[derive(Debug, Clone, Copy, Default)]
pub struct FileshareConnector;

fn subject_pattern(metadata: &Value) -> Result<Regex> {
    let raw = metadata
        .get("subject_pattern")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_SUBJECT_PATTERN);
    Regex::new(raw).map_err(|e| Error::validation(format!("invalid subject_pattern: {e}")))
}

#[derive(Debug)]
struct Observed {
    subject_id: String,
    path: String,
    md5: String,
    size_mb: f64,
    m_time: DateTime<Utc>,
    elapsed_s: f64,
}

/// Blocking scan of the share. Returns one entry per regular file.
fn scan(root: &Path, pattern: &Regex, only: Option<&str>) -> Result<Vec<Observed>> {
    if !root.is_dir() {
        return Err(Error::permanent(format!(
            "fileshare root {} is not a directory",
            root.display()
        )));
    }
    let mut subjects = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !pattern.is_match(&name) {
            tracing::debug!(subject = %name, "skipping directory outside subject pattern");
            continue;
        }
        if only.is_some_and(|s| s != name) {
            continue;
        }
        subjects.push((name, entry.path()));
    }
    subjects.sort();

    let mut observed = Vec::new();
    for (subject_id, dir) in subjects {
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry =
                entry.map_err(|e| Error::transient(format!("walking {}: {e}", dir.display())))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let started = Instant::now();
            let meta = entry.metadata().map_err(|e| Error::transient(e.to_string()))?;
            let md5 = md5_file(entry.path())?;
            let m_time = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| time::now());
            observed.push(Observed {
                subject_id: subject_id.clone(),
                path: entry.path().to_string_lossy().into_owned(),
                md5,
                size_mb: bytes_to_mb(meta.len()),
                m_time,
                elapsed_s: started.elapsed().as_secs_f64(),
            });
        }
    }
    Ok(observed)
}

#[async_trait]
impl Connector for FileshareConnector {
    fn type_tag(&self) -> &'static str {
        TYPE_TAG
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SOURCE
    }

    fn validate(&self, metadata: &Value) -> Result<()> {
        root_dir(metadata)?;
        subject_pattern(metadata)?;
        Ok(())
    }

    async fn pull(&self, req: PullRequest, recorder: &ProvenanceRecorder) -> Result<()> {
        let metadata = &req.source.data_source_metadata;
        let root = root_dir(metadata)?;
        let pattern = subject_pattern(metadata)?;
        let only = req.subject_id.clone();
        let observed = tokio::task::spawn_blocking(move || scan(&root, &pattern, only.as_deref()))
            .await
            .map_err(|e| Error::Internal(format!("fileshare scan task failed: {e}")))??;

        let source = &req.source;
        for file in &observed {
            recorder.record_file(FilePresenceEvent {
                project_id: source.project_id.clone(),
                site_id: source.site_id.clone(),
                subject_id: file.subject_id.clone(),
                data_source_name: source.data_source_name.clone(),
                file_path: file.path.clone(),
                file_md5: Some(file.md5.clone()),
                file_size_mb: Some(file.size_mb),
                m_time: file.m_time,
                job_id: None,
            });
            recorder.record_pull(PullEvent {
                project_id: source.project_id.clone(),
                site_id: source.site_id.clone(),
                subject_id: file.subject_id.clone(),
                data_source_name: source.data_source_name.clone(),
                file_path: Some(file.path.clone()),
                file_md5: Some(file.md5.clone()),
                pull_time_s: Some(file.elapsed_s),
                pull_timestamp: time::now(),
                pull_metadata: json!({ "connector": TYPE_TAG }),
                job_id: None,
            });
        }
        tracing::info!(
            job_id = req.job_id,
            data_source = %source.data_source_name,
            files = observed.len(),
            "fileshare pull finished"
        );
        Ok(())
    }
}
