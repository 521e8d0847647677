//! `directory` sink: copies files into
//! `root/<project_id>/<site_id>/<subject_id or "_">/<file name>`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use lochness_core::time;
use lochness_core::{
    Capabilities, Connector, Error, ProvenanceRecorder, PushEvent, PushRequest, Result,
};
use serde_json::{json, Value};

use crate::util::{md5_file, root_dir};

pub const TYPE_TAG: &str = "directory";

#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryConnector;

fn destination(root: &Path, req: &PushRequest, source: &Path) -> Result<PathBuf> {
    let file_name = source
        .file_name()
        .ok_or_else(|| Error::permanent(format!("{} has no file name", source.display())))?;
    Ok(root
        .join(&req.sink.project_id)
        .join(&req.sink.site_id)
        .join(req.file.subject_id.as_deref().unwrap_or("_"))
        .join(file_name))
}

#[async_trait]
impl Connector for DirectoryConnector {
    fn type_tag(&self) -> &'static str {
        TYPE_TAG
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SINK
    }

    fn validate(&self, metadata: &Value) -> Result<()> {
        root_dir(metadata).map(|_| ())
    }

    async fn push(&self, req: PushRequest, recorder: &ProvenanceRecorder) -> Result<()> {
        let root = root_dir(&req.sink.data_sink_metadata)?;
        let source = PathBuf::from(&req.file.path);
        if !tokio::fs::try_exists(&source).await? {
            return Err(Error::permanent(format!(
                "file to push does not exist: {}",
                source.display()
            )));
        }
        let dest = destination(&root, &req, &source)?;
        let started = Instant::now();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(&source, &dest).await?;
        let md5 = match req.file.md5.clone() {
            Some(md5) => md5,
            None => {
                let path = source.clone();
                tokio::task::spawn_blocking(move || md5_file(&path))
                    .await
                    .map_err(|e| Error::Internal(format!("md5 task failed: {e}")))??
            }
        };

        recorder.record_push(PushEvent {
            project_id: req.sink.project_id.clone(),
            site_id: req.sink.site_id.clone(),
            subject_id: req.file.subject_id.clone(),
            data_source_name: req.file.data_source_name.clone(),
            data_sink_id: req.sink.data_sink_id,
            data_sink_name: req.sink.data_sink_name.clone(),
            data_sink_type: TYPE_TAG.to_string(),
            file_path: req.file.path.clone(),
            file_md5: md5,
            push_time_s: started.elapsed().as_secs_f64(),
            push_timestamp: time::now(),
            push_metadata: json!({
                "destination": dest.to_string_lossy(),
                "bytes": bytes,
            }),
            job_id: None,
        });
        tracing::debug!(job_id = req.job_id, dest = %dest.display(), "file pushed");
        Ok(())
    }
}
