//! SQLite-backed job ledger and provenance event store.
//!
//! Every call opens its own connection; the `*_async` variants move the
//! blocking work onto tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

mod jobs;
mod provenance;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(thiserror::Error, Debug)]
pub enum KernelError {
    #[error(transparent)]
    Domain(#[from] lochness_core::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl KernelError {
    /// The domain error, if this is one.
    pub fn domain(&self) -> Option<&lochness_core::Error> {
        match self {
            KernelError::Domain(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T, E = KernelError> = std::result::Result<T, E>;

#[derive(Clone, Debug)]
pub struct Kernel {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl Kernel {
    /// Opens (creating if needed) `<dir>/lochness.sqlite`.
    pub fn open(dir: &Path) -> Result<Self> {
        Self::open_with(dir, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with(dir: &Path, busy_timeout: Duration) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let kernel = Self {
            db_path: dir.join(lochness_core::config::DB_FILE_NAME),
            busy_timeout,
        };
        let conn = kernel.conn()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");
        Self::init_schema(&conn)?;
        tracing::debug!(path = %kernel.db_path.display(), "kernel opened");
        Ok(kernel)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
              job_id INTEGER PRIMARY KEY AUTOINCREMENT,
              job_type TEXT NOT NULL CHECK (length(trim(job_type)) > 0),
              project_id TEXT NOT NULL CHECK (length(trim(project_id)) > 0),
              site_id TEXT NOT NULL CHECK (length(trim(site_id)) > 0),
              data_source_name TEXT,
              data_sink_name TEXT,
              requested_by TEXT,
              status TEXT NOT NULL CHECK (status IN ('pending','running','success','error')),
              job_metadata TEXT NOT NULL DEFAULT '{}',
              created_at TEXT NOT NULL,
              started_at TEXT,
              finished_at TEXT,
              result TEXT,
              CHECK ((status = 'pending') = (started_at IS NULL)),
              CHECK ((status IN ('pending','running')) = (finished_at IS NULL))
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, job_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_scope ON jobs(project_id, site_id);
            -- at most one running job per (type, scope)
            CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_one_running ON jobs(
              job_type, project_id, site_id,
              IFNULL(data_source_name, ''), IFNULL(data_sink_name, '')
            ) WHERE status = 'running';
            CREATE TRIGGER IF NOT EXISTS jobs_no_delete BEFORE DELETE ON jobs
            BEGIN
              SELECT RAISE(ABORT, 'jobs are never deleted');
            END;

            CREATE TABLE IF NOT EXISTS data_pull (
              data_pull_id INTEGER PRIMARY KEY AUTOINCREMENT,
              project_id TEXT NOT NULL,
              site_id TEXT NOT NULL,
              subject_id TEXT NOT NULL,
              data_source_name TEXT NOT NULL,
              file_path TEXT,
              file_md5 TEXT,
              pull_time_s REAL,
              pull_timestamp TEXT NOT NULL,
              pull_metadata TEXT NOT NULL DEFAULT '{}',
              job_id INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_pull_scope
              ON data_pull(project_id, site_id, data_source_name, subject_id);

            CREATE TABLE IF NOT EXISTS data_push (
              data_push_id INTEGER PRIMARY KEY AUTOINCREMENT,
              project_id TEXT NOT NULL,
              site_id TEXT NOT NULL,
              subject_id TEXT,
              data_source_name TEXT,
              data_sink_id INTEGER NOT NULL,
              data_sink_name TEXT NOT NULL,
              data_sink_type TEXT NOT NULL,
              file_path TEXT NOT NULL,
              file_md5 TEXT NOT NULL,
              push_time_s REAL NOT NULL,
              push_timestamp TEXT NOT NULL,
              push_metadata TEXT NOT NULL DEFAULT '{}',
              job_id INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_push_scope
              ON data_push(project_id, site_id, data_source_name, subject_id);

            CREATE TABLE IF NOT EXISTS files (
              file_id INTEGER PRIMARY KEY AUTOINCREMENT,
              project_id TEXT NOT NULL,
              site_id TEXT NOT NULL,
              subject_id TEXT NOT NULL,
              data_source_name TEXT NOT NULL,
              file_path TEXT NOT NULL,
              file_md5 TEXT,
              file_size_mb REAL,
              m_time TEXT NOT NULL,
              job_id INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_files_scope
              ON files(project_id, site_id, data_source_name, subject_id);
            CREATE INDEX IF NOT EXISTS idx_files_path ON files(file_path, m_time);

            -- provenance is append-only
            CREATE TRIGGER IF NOT EXISTS data_pull_no_update BEFORE UPDATE ON data_pull
            BEGIN SELECT RAISE(ABORT, 'data_pull is append-only'); END;
            CREATE TRIGGER IF NOT EXISTS data_pull_no_delete BEFORE DELETE ON data_pull
            BEGIN SELECT RAISE(ABORT, 'data_pull is append-only'); END;
            CREATE TRIGGER IF NOT EXISTS data_push_no_update BEFORE UPDATE ON data_push
            BEGIN SELECT RAISE(ABORT, 'data_push is append-only'); END;
            CREATE TRIGGER IF NOT EXISTS data_push_no_delete BEFORE DELETE ON data_push
            BEGIN SELECT RAISE(ABORT, 'data_push is append-only'); END;
            CREATE TRIGGER IF NOT EXISTS files_no_update BEFORE UPDATE ON files
            BEGIN SELECT RAISE(ABORT, 'files is append-only'); END;
            CREATE TRIGGER IF NOT EXISTS files_no_delete BEFORE DELETE ON files
            BEGIN SELECT RAISE(ABORT, 'files is append-only'); END;
            "#,
        )?;
        Ok(())
    }

    /// Runs `f` against a clone of this kernel on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Kernel) -> Result<T> + Send + 'static,
    {
        let k = self.clone();
        tokio::task::spawn_blocking(move || f(k)).await?
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    lochness_core::time::parse(raw).map_err(|e| KernelError::Corrupt(e.to_string()))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_json(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw)
        .map_err(|e| KernelError::Corrupt(format!("metadata is not valid json: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_state_dir_and_is_reentrant() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("nested").join("state");
        let first = Kernel::open(&state).unwrap();
        assert!(first.db_path().ends_with("lochness.sqlite"));
        assert!(first.db_path().exists());
        Kernel::open(&state).unwrap();
    }

    #[test]
    fn database_runs_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = Kernel::open(dir.path()).unwrap();
        let mode: String = kernel
            .conn()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_ascii_lowercase(), "wal");
    }
}
