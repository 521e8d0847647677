use std::time::Duration;

use chrono::{DateTime, Utc};
use lochness_core::time;
use lochness_core::{
    ClaimFilter, Completion, Error, Job, JobFilter, JobOutcome, JobStatus, JobType, NewJob,
    ProvenanceBatch, Scope, ValidJob,
};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::provenance::{count_batch, insert_batch};
use crate::{parse_json, parse_opt_ts, parse_ts, Kernel, KernelError, Result};

const JOB_COLUMNS: &str = "job_id, job_type, project_id, site_id, data_source_name, \
     data_sink_name, requested_by, status, job_metadata, created_at, started_at, \
     finished_at, result";

/// Shared by `query` and `count`.
const FILTER_WHERE: &str = "(?1 IS NULL OR project_id = ?1)
       AND (?2 IS NULL OR site_id = ?2)
       AND (?3 IS NULL OR job_type = ?3)
       AND (?4 IS NULL OR status = ?4)
       AND (?5 IS NULL OR data_source_name = ?5)";

/// Oldest pending job matching the filter whose `(type, scope)` has nothing
/// running. Optional names compare with `IS` so NULL equals NULL.
const CLAIM_SQL: &str = "UPDATE jobs SET status = 'running', started_at = ?1
     WHERE job_id = (
       SELECT p.job_id FROM jobs p
       WHERE p.status = 'pending'
         AND (?2 IS NULL OR p.job_type = ?2)
         AND (?3 IS NULL OR p.project_id = ?3)
         AND (?4 IS NULL OR p.site_id = ?4)
         AND NOT EXISTS (
           SELECT 1 FROM jobs r
           WHERE r.status = 'running'
             AND r.job_type = p.job_type
             AND r.project_id = p.project_id
             AND r.site_id = p.site_id
             AND r.data_source_name IS p.data_source_name
             AND r.data_sink_name IS p.data_sink_name
         )
       ORDER BY p.job_id ASC
       LIMIT 1
     )
     RETURNING job_id, job_type, project_id, site_id, data_source_name, data_sink_name,
       requested_by, status, job_metadata, created_at, started_at, finished_at, result";

/// Raw column values; converted to a [`Job`] outside the rusqlite closure so
/// parse failures surface as `Corrupt`.
struct JobRow {
    job_id: i64,
    job_type: String,
    project_id: String,
    site_id: String,
    data_source_name: Option<String>,
    data_sink_name: Option<String>,
    requested_by: Option<String>,
    status: String,
    job_metadata: String,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    result: Option<String>,
}

impl JobRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            job_type: row.get(1)?,
            project_id: row.get(2)?,
            site_id: row.get(3)?,
            data_source_name: row.get(4)?,
            data_sink_name: row.get(5)?,
            requested_by: row.get(6)?,
            status: row.get(7)?,
            job_metadata: row.get(8)?,
            created_at: row.get(9)?,
            started_at: row.get(10)?,
            finished_at: row.get(11)?,
            result: row.get(12)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let status = JobStatus::from_slug(&self.status).ok_or_else(|| {
            KernelError::Corrupt(format!("job {} has status '{}'", self.job_id, self.status))
        })?;
        Ok(Job {
            job_id: self.job_id,
            job_type: JobType::from_slug(&self.job_type),
            scope: Scope {
                project_id: self.project_id,
                site_id: self.site_id,
                data_source_name: self.data_source_name,
                data_sink_name: self.data_sink_name,
            },
            requested_by: self.requested_by,
            status,
            job_metadata: parse_json(&self.job_metadata)?,
            created_at: parse_ts(&self.created_at)?,
            started_at: parse_opt_ts(self.started_at)?,
            finished_at: parse_opt_ts(self.finished_at)?,
            result: self.result,
        })
    }
}

fn get_job(conn: &Connection, job_id: i64) -> Result<Option<Job>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1");
    conn.query_row(&sql, params![job_id], JobRow::read)
        .optional()?
        .map(JobRow::into_job)
        .transpose()
}

#[cfg(feature = "metrics")]
fn count_completion(status: JobStatus) {
    metrics::counter!("lochness_jobs_completed_total", "status" => status.as_str()).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn count_completion(_status: JobStatus) {}

impl Kernel {
    /// Validates and persists a new `pending` job. Never runs anything.
    pub fn enqueue(&self, new_job: NewJob) -> Result<i64> {
        let job = new_job.validate()?;
        self.insert_job(&job)
    }

    pub fn insert_job(&self, job: &ValidJob) -> Result<i64> {
        let conn = self.conn()?;
        let metadata = serde_json::to_string(&job.job_metadata)?;
        conn.execute(
            "INSERT INTO jobs(job_type, project_id, site_id, data_source_name, data_sink_name,
                              requested_by, status, job_metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8)",
            params![
                job.job_type.as_str(),
                job.scope.project_id,
                job.scope.site_id,
                job.scope.data_source_name,
                job.scope.data_sink_name,
                job.requested_by,
                metadata,
                time::format(&time::now()),
            ],
        )?;
        let job_id = conn.last_insert_rowid();
        tracing::debug!(
            job_id,
            job_type = %job.job_type,
            project_id = %job.scope.project_id,
            site_id = %job.scope.site_id,
            "job enqueued"
        );
        Ok(job_id)
    }

    /// Atomically moves one eligible pending job to `running`. `None` means
    /// nothing was eligible, including when another worker won the race.
    pub fn claim(&self, filter: &ClaimFilter) -> Result<Option<Job>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let claimed = {
            let mut stmt = tx.prepare(CLAIM_SQL)?;
            stmt.query_row(
                params![
                    time::format(&time::now()),
                    filter.job_type.as_ref().map(JobType::as_str),
                    filter.project_id,
                    filter.site_id,
                ],
                JobRow::read,
            )
            .optional()?
        };
        tx.commit()?;
        claimed.map(JobRow::into_job).transpose()
    }

    /// Moves a running job to its terminal state. Repeating the call on a
    /// finished job is a no-op reported as `AlreadyTerminal`.
    pub fn complete(&self, job_id: i64, outcome: &JobOutcome) -> Result<Completion> {
        self.finish(job_id, outcome, &ProvenanceBatch::default())
    }

    /// Like [`Kernel::complete`], but also appends `batch` in the same
    /// transaction. The events land only if this call is the one that moves
    /// the job out of `running`; a job the watchdog already reaped keeps
    /// its result and gets no provenance.
    pub fn finish(
        &self,
        job_id: i64,
        outcome: &JobOutcome,
        batch: &ProvenanceBatch,
    ) -> Result<Completion> {
        let to = outcome.status();
        if !to.is_terminal() {
            return Err(Error::InvalidTransition {
                job_id,
                from: JobStatus::Running,
                to,
            }
            .into());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE jobs SET status = ?2, finished_at = ?3, result = ?4
             WHERE job_id = ?1 AND status = 'running'",
            params![
                job_id,
                to.as_str(),
                time::format(&time::now()),
                outcome.result()
            ],
        )?;
        if changed == 1 {
            insert_batch(&tx, batch)?;
        }
        let current = get_job(&tx, job_id)?.ok_or(Error::NotFound(job_id))?;
        let completion = match current.status {
            JobStatus::Pending => {
                return Err(Error::InvalidTransition {
                    job_id,
                    from: JobStatus::Pending,
                    to,
                }
                .into())
            }
            _ if changed == 1 => Completion::Completed(current),
            _ => Completion::AlreadyTerminal(current),
        };
        tx.commit()?;
        match &completion {
            Completion::Completed(job) => {
                count_completion(job.status);
                count_batch(batch);
                let events = batch.len();
                tracing::debug!(job_id, status = %job.status, events, "job completed");
            }
            Completion::AlreadyTerminal(job) if !batch.is_empty() => {
                tracing::warn!(
                    job_id,
                    status = %job.status,
                    dropped = batch.len(),
                    "job already terminal; provenance dropped"
                );
            }
            Completion::AlreadyTerminal(_) => {}
        }
        Ok(completion)
    }

    /// Forces every job running since before `started_before` into `error`
    /// with a synthetic stuck-job result. Returns the reaped jobs.
    pub fn reap_stuck(
        &self,
        started_before: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<Job>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stuck: Vec<(i64, String)> = {
            let mut stmt = tx.prepare(
                "SELECT job_id, started_at FROM jobs
                 WHERE status = 'running' AND started_at < ?1
                 ORDER BY job_id",
            )?;
            let rows = stmt.query_map(params![time::format(&started_before)], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        let now = time::format(&time::now());
        let mut reaped = Vec::with_capacity(stuck.len());
        for (job_id, started_at) in stuck {
            let result = Error::StuckJobTimeout {
                started_at,
                timeout_ms: timeout.as_millis(),
            }
            .to_string();
            tx.execute(
                "UPDATE jobs SET status = 'error', finished_at = ?2, result = ?3
                 WHERE job_id = ?1 AND status = 'running'",
                params![job_id, now, result],
            )?;
            if let Some(job) = get_job(&tx, job_id)? {
                reaped.push(job);
            }
        }
        tx.commit()?;
        for job in &reaped {
            count_completion(job.status);
            tracing::warn!(job_id = job.job_id, job_type = %job.job_type, "reaped stuck job");
        }
        Ok(reaped)
    }

    pub fn get(&self, job_id: i64) -> Result<Option<Job>> {
        get_job(&self.conn()?, job_id)
    }

    /// Newest first; absent filter fields match everything.
    pub fn query(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE {FILTER_WHERE}
             ORDER BY created_at DESC, job_id DESC
             LIMIT ?6 OFFSET ?7"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                filter.project_id,
                filter.site_id,
                filter.job_type.as_ref().map(JobType::as_str),
                filter.status.map(|s| s.as_str()),
                filter.data_source_name,
                i64::from(filter.limit),
                i64::from(filter.offset),
            ],
            JobRow::read,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_job()?);
        }
        Ok(out)
    }

    /// Number of jobs matching the filter, ignoring `limit` and `offset`.
    pub fn count(&self, filter: &JobFilter) -> Result<i64> {
        let conn = self.conn()?;
        let sql = format!("SELECT COUNT(*) FROM jobs WHERE {FILTER_WHERE}");
        let n = conn.query_row(
            &sql,
            params![
                filter.project_id,
                filter.site_id,
                filter.job_type.as_ref().map(JobType::as_str),
                filter.status.map(|s| s.as_str()),
                filter.data_source_name,
            ],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let conn = self.conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------

    pub async fn enqueue_async(&self, new_job: NewJob) -> Result<i64> {
        self.blocking(move |k| k.enqueue(new_job)).await
    }

    pub async fn claim_async(&self, filter: &ClaimFilter) -> Result<Option<Job>> {
        let filter = filter.clone();
        self.blocking(move |k| k.claim(&filter)).await
    }

    pub async fn complete_async(&self, job_id: i64, outcome: JobOutcome) -> Result<Completion> {
        self.blocking(move |k| k.complete(job_id, &outcome)).await
    }

    pub async fn finish_async(
        &self,
        job_id: i64,
        outcome: JobOutcome,
        batch: ProvenanceBatch,
    ) -> Result<Completion> {
        self.blocking(move |k| k.finish(job_id, &outcome, &batch))
            .await
    }

    pub async fn reap_stuck_async(
        &self,
        started_before: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<Job>> {
        self.blocking(move |k| k.reap_stuck(started_before, timeout))
            .await
    }

    pub async fn get_async(&self, job_id: i64) -> Result<Option<Job>> {
        self.blocking(move |k| k.get(job_id)).await
    }

    pub async fn query_async(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.blocking(move |k| k.query(&filter)).await
    }

    pub async fn count_async(&self, filter: JobFilter) -> Result<i64> {
        self.blocking(move |k| k.count(&filter)).await
    }

    pub async fn count_by_status_async(&self, status: JobStatus) -> Result<i64> {
        self.blocking(move |k| k.count_by_status(status)).await
    }
}
