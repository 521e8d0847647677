//! Dispatch of one claimed job to its connector.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use lochness_core::{
    resolve_credentials, Connector, DataSink, DataSource, Error, FileRef, Job, JobType,
    ProvenanceRecorder, PullRequest, PushRequest, Redactor, Result, Secret,
};

use crate::Scheduler;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Clone, Copy)]
enum SourceOp {
    Pull,
    RefreshMetadata,
}

impl Scheduler {
    /// Runs a connector call under the configured timeout, turning panics
    /// and timeouts into connector errors.
    pub(crate) async fn guarded<F>(&self, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let timeout = self.settings.connector_timeout;
        match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
            Err(_) => Err(Error::transient(format!(
                "connector timed out after {}ms",
                timeout.as_millis()
            ))),
            Ok(Err(payload)) => Err(Error::permanent(format!(
                "connector panicked: {}",
                panic_message(payload.as_ref())
            ))),
            Ok(Ok(result)) => result,
        }
    }

    /// Executes the job, writing events into `recorder`. Returns a short
    /// human summary on success. Any secret resolved along the way is
    /// registered with `redactor`.
    pub(crate) async fn execute(
        &self,
        job: &Job,
        recorder: &ProvenanceRecorder,
        redactor: &mut Redactor,
    ) -> Result<String> {
        match &job.job_type {
            JobType::DataPull => self.run_source(job, SourceOp::Pull, recorder, redactor).await,
            JobType::RefreshMetadata => {
                self.run_source(job, SourceOp::RefreshMetadata, recorder, redactor)
                    .await
            }
            JobType::DataPush => self.run_push(job, recorder, redactor).await,
            JobType::Other(tag) => Err(Error::UnsupportedType(format!(
                "unsupported job type '{tag}'"
            ))),
        }
    }

    fn source_for(&self, job: &Job) -> Result<(DataSource, Arc<dyn Connector>)> {
        let name = job.scope.data_source_name.as_deref().ok_or_else(|| {
            Error::validation(format!("{} jobs require data_source_name", job.job_type))
        })?;
        let source = self
            .catalog
            .data_source(&job.scope.project_id, &job.scope.site_id, name)
            .ok_or_else(|| {
                Error::validation(format!(
                    "unknown data source '{name}' for {}/{}",
                    job.scope.project_id, job.scope.site_id
                ))
            })?;
        if !source.data_source_is_active {
            return Err(Error::validation(format!("data source '{name}' is inactive")));
        }
        let connector = self.registry.get(&source.data_source_type)?;
        Ok((source, connector))
    }

    fn sink_for(&self, job: &Job) -> Result<(DataSink, Arc<dyn Connector>)> {
        let name = job.scope.data_sink_name.as_deref().ok_or_else(|| {
            Error::validation(format!("{} jobs require data_sink_name", job.job_type))
        })?;
        let sink = self
            .catalog
            .data_sink(&job.scope.project_id, &job.scope.site_id, name)
            .ok_or_else(|| {
                Error::validation(format!(
                    "unknown data sink '{name}' for {}/{}",
                    job.scope.project_id, job.scope.site_id
                ))
            })?;
        let connector = self.registry.get(&sink.data_sink_type)?;
        if !connector.capabilities().push {
            return Err(Error::UnsupportedType(format!(
                "connector '{}' cannot push",
                sink.data_sink_type
            )));
        }
        Ok((sink, connector))
    }

    async fn credentials(
        &self,
        connector: &dyn Connector,
        project_id: &str,
        metadata: &serde_json::Value,
        redactor: &mut Redactor,
    ) -> Result<Option<Secret>> {
        let secret =
            resolve_credentials(connector, self.keystore.as_ref(), project_id, metadata).await?;
        if let Some(secret) = &secret {
            redactor.add_secret(secret);
        }
        Ok(secret)
    }

    async fn run_source(
        &self,
        job: &Job,
        op: SourceOp,
        recorder: &ProvenanceRecorder,
        redactor: &mut Redactor,
    ) -> Result<String> {
        let (source, connector) = self.source_for(job)?;
        let secret = self
            .credentials(
                connector.as_ref(),
                &source.project_id,
                &source.data_source_metadata,
                redactor,
            )
            .await?;
        let name = source.data_source_name.clone();
        let req = PullRequest {
            job_id: job.job_id,
            source,
            subject_id: job.metadata_str("subject_id").map(str::to_string),
            job_metadata: job.job_metadata.clone(),
            secret,
        };
        match op {
            SourceOp::Pull => {
                self.guarded(connector.pull(req, recorder)).await?;
                Ok(format!("pulled from {name}"))
            }
            SourceOp::RefreshMetadata => {
                self.guarded(connector.refresh_metadata(req, recorder))
                    .await?;
                Ok(format!("refreshed metadata for {name}"))
            }
        }
    }

    /// Files named by `job_metadata.file_path`, else the latest known file
    /// per path for the job's project/site/source.
    async fn files_to_push(&self, job: &Job) -> Result<Vec<FileRef>> {
        if let Some(path) = job.metadata_str("file_path") {
            return Ok(vec![FileRef {
                path: path.to_string(),
                md5: job.metadata_str("file_md5").map(str::to_string),
                subject_id: job.metadata_str("subject_id").map(str::to_string),
                data_source_name: job.scope.data_source_name.clone(),
            }]);
        }
        let subject = job.metadata_str("subject_id");
        let latest = self
            .kernel
            .latest_files_async(
                &job.scope.project_id,
                &job.scope.site_id,
                job.scope.data_source_name.as_deref(),
            )
            .await
            .map_err(|e| Error::Internal(format!("reading latest files: {e}")))?;
        Ok(latest
            .into_iter()
            .filter(|f| subject.map_or(true, |s| f.event.subject_id == s))
            .map(|f| FileRef {
                path: f.event.file_path,
                md5: f.event.file_md5,
                subject_id: Some(f.event.subject_id),
                data_source_name: Some(f.event.data_source_name),
            })
            .collect())
    }

    async fn run_push(
        &self,
        job: &Job,
        recorder: &ProvenanceRecorder,
        redactor: &mut Redactor,
    ) -> Result<String> {
        let (sink, connector) = self.sink_for(job)?;
        let secret = self
            .credentials(
                connector.as_ref(),
                &sink.project_id,
                &sink.data_sink_metadata,
                redactor,
            )
            .await?;
        let files = self.files_to_push(job).await?;
        let count = files.len();
        // one deadline for the whole job, not per file
        self.guarded(async {
            for file in files {
                let req = PushRequest {
                    job_id: job.job_id,
                    sink: sink.clone(),
                    file,
                    job_metadata: job.job_metadata.clone(),
                    secret: secret.clone(),
                };
                connector.push(req, recorder).await?;
            }
            Ok::<_, Error>(())
        })
        .await?;
        Ok(format!("pushed {count} file(s) to {}", sink.data_sink_name))
    }
}
