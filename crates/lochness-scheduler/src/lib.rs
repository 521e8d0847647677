//! Worker pool that claims jobs from the ledger, runs them through the
//! connector registry and records the outcome. A watchdog reaps jobs that
//! stay `running` for too long.

use std::sync::Arc;

use lochness_core::{
    time, Catalog, Completion, Job, JobOutcome, JobStatus, Keystore, NewJob, ProvenanceBatch,
    ProvenanceRecorder, Redactor, Registry,
};
use lochness_events::Bus;
use lochness_kernel::{Kernel, KernelError};
use lochness_topics as topics;
use serde_json::json;

mod executor;
pub mod settings;
pub mod tasks;

pub use settings::SchedulerSettings;
pub use tasks::{spawn_supervised, TaskHandle, TaskManager};

#[derive(Clone)]
pub struct Scheduler {
    kernel: Kernel,
    registry: Arc<Registry>,
    catalog: Arc<dyn Catalog>,
    keystore: Arc<dyn Keystore>,
    bus: Bus,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        kernel: Kernel,
        registry: Arc<Registry>,
        catalog: Arc<dyn Catalog>,
        keystore: Arc<dyn Keystore>,
        bus: Bus,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            kernel,
            registry,
            catalog,
            keystore,
            bus,
            settings,
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Persists a pending job and announces it. Execution happens later on
    /// whichever worker claims it.
    pub async fn submit(&self, new_job: NewJob) -> Result<i64, KernelError> {
        let job_type = new_job.job_type.trim().to_string();
        let job_id = self.kernel.enqueue_async(new_job).await?;
        metrics::counter!("lochness_jobs_enqueued_total").increment(1);
        self.bus.publish(
            topics::TOPIC_JOBS_ENQUEUED,
            &json!({"job_id": job_id, "job_type": job_type}),
        );
        Ok(job_id)
    }

    /// Claims and runs at most one job. `Ok(None)` means nothing was
    /// eligible.
    pub async fn tick(&self, worker: &str) -> Result<Option<Job>, KernelError> {
        let Some(job) = self.kernel.claim_async(&self.settings.claim_filter).await? else {
            return Ok(None);
        };
        metrics::counter!("lochness_jobs_claimed_total").increment(1);
        tracing::info!(
            worker,
            job_id = job.job_id,
            job_type = %job.job_type,
            project_id = %job.scope.project_id,
            site_id = %job.scope.site_id,
            "job claimed"
        );
        self.bus.publish(
            topics::TOPIC_JOBS_CLAIMED,
            &json!({"job_id": job.job_id, "job_type": job.job_type, "worker": worker}),
        );
        self.run_job(job).await.map(Some)
    }

    /// Executes a job that is already `running` and moves it to its
    /// terminal state. Provenance is committed only when the connector
    /// succeeded, in the same transaction that finishes the job.
    pub async fn run_job(&self, job: Job) -> Result<Job, KernelError> {
        let job_id = job.job_id;
        let recorder = ProvenanceRecorder::for_job(job_id);
        let mut redactor = Redactor::new();
        let (outcome, batch) = match self.execute(&job, &recorder, &mut redactor).await {
            Ok(summary) => {
                let batch = recorder.take();
                let outcome =
                    JobOutcome::success(format!("{summary}; {} provenance event(s)", batch.len()));
                (outcome, batch)
            }
            Err(err) => {
                // drop anything the connector wrote before failing
                let discarded = recorder.take().len();
                let result = redactor.redact(&err.to_string());
                tracing::warn!(
                    job_id,
                    code = err.code(),
                    discarded,
                    result = %result,
                    "job failed"
                );
                (JobOutcome::failure(result), ProvenanceBatch::default())
            }
        };

        let events = batch.len();
        let completion = match self.kernel.finish_async(job_id, outcome, batch).await {
            Ok(completion) => completion,
            Err(err @ KernelError::Domain(_)) => return Err(err),
            Err(err) => {
                tracing::error!(job_id, %err, "provenance commit failed");
                let result = redactor.redact(&format!("failed to record provenance: {err}"));
                self.kernel
                    .complete_async(job_id, JobOutcome::failure(result))
                    .await?
            }
        };
        let finished = match completion {
            Completion::Completed(job) => {
                let topic = match job.status {
                    JobStatus::Success => {
                        if events > 0 {
                            self.bus.publish(
                                topics::TOPIC_PROVENANCE_APPENDED,
                                &json!({"job_id": job_id, "events": events}),
                            );
                        }
                        topics::TOPIC_JOBS_COMPLETED
                    }
                    _ => topics::TOPIC_JOBS_FAILED,
                };
                self.bus.publish(
                    topic,
                    &json!({
                        "job_id": job.job_id,
                        "job_type": job.job_type,
                        "status": job.status,
                        "result": job.result,
                    }),
                );
                job
            }
            Completion::AlreadyTerminal(job) => {
                tracing::warn!(
                    job_id,
                    status = %job.status,
                    "job was already terminal; outcome dropped"
                );
                job
            }
        };
        Ok(finished)
    }

    /// Runs jobs until nothing is eligible. Returns the jobs it finished.
    pub async fn drain(&self, worker: &str) -> Result<Vec<Job>, KernelError> {
        let mut finished = Vec::new();
        while let Some(job) = self.tick(worker).await? {
            finished.push(job);
        }
        Ok(finished)
    }

    /// One watchdog pass: forces jobs running longer than `stuck_after`
    /// into `error`.
    pub async fn reap_once(&self) -> Result<Vec<Job>, KernelError> {
        let stuck_after = self.settings.stuck_after;
        let cutoff = chrono::Duration::from_std(stuck_after)
            .map(|d| time::now() - d)
            .unwrap_or_else(|_| time::now());
        let reaped = self.kernel.reap_stuck_async(cutoff, stuck_after).await?;
        for job in &reaped {
            metrics::counter!("lochness_jobs_reaped_total").increment(1);
            self.bus.publish(
                topics::TOPIC_JOBS_REAPED,
                &json!({"job_id": job.job_id, "job_type": job.job_type, "result": job.result}),
            );
        }
        Ok(reaped)
    }

    pub async fn run_worker(self, name: String) {
        tracing::info!(worker = %name, "worker started");
        loop {
            match self.tick(&name).await {
                Ok(Some(_)) => {}
                Ok(None) => tokio::time::sleep(self.settings.poll_interval).await,
                Err(err) => {
                    tracing::warn!(worker = %name, %err, "worker tick failed");
                    tokio::time::sleep(self.settings.error_backoff).await;
                }
            }
        }
    }

    pub async fn run_watchdog(self) {
        let mut interval = tokio::time::interval(self.settings.watchdog_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.reap_once().await {
                Ok(reaped) if !reaped.is_empty() => {
                    tracing::warn!(count = reaped.len(), "watchdog reaped stuck jobs");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, "watchdog pass failed"),
            }
        }
    }

    /// Spawns the configured number of supervised workers plus the watchdog.
    pub fn spawn(&self) -> TaskManager {
        let mut tasks = TaskManager::new();
        for i in 0..self.settings.workers {
            let scheduler = self.clone();
            let name = format!("worker.{i}");
            tasks.push(spawn_supervised(name.clone(), move || {
                scheduler.clone().run_worker(name.clone())
            }));
        }
        let scheduler = self.clone();
        tasks.push(spawn_supervised("scheduler.watchdog", move || {
            scheduler.clone().run_watchdog()
        }));
        tasks
    }
}
