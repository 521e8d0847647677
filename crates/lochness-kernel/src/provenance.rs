use lochness_core::time;
use lochness_core::{
    reconcile, FilePresenceEvent, Granularity, ProvenanceBatch, PullEvent, PushEvent,
    StatusScope, Stored, SyncStatus,
};
use rusqlite::{params, Connection, Row};

use crate::{parse_json, parse_ts, Kernel, Result};

const PULL_COLUMNS: &str = "data_pull_id, project_id, site_id, subject_id, data_source_name, \
     file_path, file_md5, pull_time_s, pull_timestamp, pull_metadata, job_id";
const PUSH_COLUMNS: &str = "data_push_id, project_id, site_id, subject_id, data_source_name, \
     data_sink_id, data_sink_name, data_sink_type, file_path, file_md5, push_time_s, \
     push_timestamp, push_metadata, job_id";
const FILE_COLUMNS: &str = "file_id, project_id, site_id, subject_id, data_source_name, \
     file_path, file_md5, file_size_mb, m_time, job_id";

/// Scope predicate shared by all three streams: project and site are
/// pinned, data source and subject narrow only when given.
const SCOPE_WHERE: &str = "project_id = ?1 AND site_id = ?2
     AND (?3 IS NULL OR data_source_name = ?3)
     AND (?4 IS NULL OR subject_id = ?4)";

fn insert_pull(conn: &Connection, e: &PullEvent) -> Result<i64> {
    conn.execute(
        "INSERT INTO data_pull(project_id, site_id, subject_id, data_source_name, file_path,
                               file_md5, pull_time_s, pull_timestamp, pull_metadata, job_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            e.project_id,
            e.site_id,
            e.subject_id,
            e.data_source_name,
            e.file_path,
            e.file_md5,
            e.pull_time_s,
            time::format(&e.pull_timestamp),
            serde_json::to_string(&e.pull_metadata)?,
            e.job_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_push(conn: &Connection, e: &PushEvent) -> Result<i64> {
    conn.execute(
        "INSERT INTO data_push(project_id, site_id, subject_id, data_source_name, data_sink_id,
                               data_sink_name, data_sink_type, file_path, file_md5, push_time_s,
                               push_timestamp, push_metadata, job_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            e.project_id,
            e.site_id,
            e.subject_id,
            e.data_source_name,
            e.data_sink_id,
            e.data_sink_name,
            e.data_sink_type,
            e.file_path,
            e.file_md5,
            e.push_time_s,
            time::format(&e.push_timestamp),
            serde_json::to_string(&e.push_metadata)?,
            e.job_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_file(conn: &Connection, e: &FilePresenceEvent) -> Result<i64> {
    conn.execute(
        "INSERT INTO files(project_id, site_id, subject_id, data_source_name, file_path,
                           file_md5, file_size_mb, m_time, job_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            e.project_id,
            e.site_id,
            e.subject_id,
            e.data_source_name,
            e.file_path,
            e.file_md5,
            e.file_size_mb,
            time::format(&e.m_time),
            e.job_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

type RawPull = (i64, PullEvent, String, String);

fn read_pull(row: &Row<'_>) -> rusqlite::Result<RawPull> {
    Ok((
        row.get(0)?,
        PullEvent {
            project_id: row.get(1)?,
            site_id: row.get(2)?,
            subject_id: row.get(3)?,
            data_source_name: row.get(4)?,
            file_path: row.get(5)?,
            file_md5: row.get(6)?,
            pull_time_s: row.get(7)?,
            pull_timestamp: Default::default(),
            pull_metadata: serde_json::Value::Null,
            job_id: row.get(10)?,
        },
        row.get(8)?,
        row.get(9)?,
    ))
}

fn finish_pull((id, mut event, ts, metadata): RawPull) -> Result<Stored<PullEvent>> {
    event.pull_timestamp = parse_ts(&ts)?;
    event.pull_metadata = parse_json(&metadata)?;
    Ok(Stored::new(id, event))
}

type RawPush = (i64, PushEvent, String, String);

fn read_push(row: &Row<'_>) -> rusqlite::Result<RawPush> {
    Ok((
        row.get(0)?,
        PushEvent {
            project_id: row.get(1)?,
            site_id: row.get(2)?,
            subject_id: row.get(3)?,
            data_source_name: row.get(4)?,
            data_sink_id: row.get(5)?,
            data_sink_name: row.get(6)?,
            data_sink_type: row.get(7)?,
            file_path: row.get(8)?,
            file_md5: row.get(9)?,
            push_time_s: row.get(10)?,
            push_timestamp: Default::default(),
            push_metadata: serde_json::Value::Null,
            job_id: row.get(13)?,
        },
        row.get(11)?,
        row.get(12)?,
    ))
}

fn finish_push((id, mut event, ts, metadata): RawPush) -> Result<Stored<PushEvent>> {
    event.push_timestamp = parse_ts(&ts)?;
    event.push_metadata = parse_json(&metadata)?;
    Ok(Stored::new(id, event))
}

type RawFile = (i64, FilePresenceEvent, String);

fn read_file(row: &Row<'_>) -> rusqlite::Result<RawFile> {
    Ok((
        row.get(0)?,
        FilePresenceEvent {
            project_id: row.get(1)?,
            site_id: row.get(2)?,
            subject_id: row.get(3)?,
            data_source_name: row.get(4)?,
            file_path: row.get(5)?,
            file_md5: row.get(6)?,
            file_size_mb: row.get(7)?,
            m_time: Default::default(),
            job_id: row.get(9)?,
        },
        row.get(8)?,
    ))
}

fn finish_file((id, mut event, ts): RawFile) -> Result<Stored<FilePresenceEvent>> {
    event.m_time = parse_ts(&ts)?;
    Ok(Stored::new(id, event))
}

/// SQLite treats a negative LIMIT as unbounded.
fn sql_limit(limit: Option<u32>) -> i64 {
    limit.map(i64::from).unwrap_or(-1)
}

#[cfg(feature = "metrics")]
fn count_appended(stream: &'static str, n: usize) {
    if n > 0 {
        metrics::counter!("lochness_provenance_events_total", "stream" => stream)
            .increment(n as u64);
    }
}

#[cfg(not(feature = "metrics"))]
fn count_appended(_stream: &'static str, _n: usize) {}

/// Writes the whole batch on `conn`; the caller owns the transaction.
pub(crate) fn insert_batch(conn: &Connection, batch: &ProvenanceBatch) -> Result<()> {
    for e in &batch.files {
        insert_file(conn, e)?;
    }
    for e in &batch.pulls {
        insert_pull(conn, e)?;
    }
    for e in &batch.pushes {
        insert_push(conn, e)?;
    }
    Ok(())
}

pub(crate) fn count_batch(batch: &ProvenanceBatch) {
    count_appended("file", batch.files.len());
    count_appended("pull", batch.pulls.len());
    count_appended("push", batch.pushes.len());
}

impl Kernel {
    pub fn append_pull(&self, event: &PullEvent) -> Result<i64> {
        let id = insert_pull(&self.conn()?, event)?;
        count_appended("pull", 1);
        Ok(id)
    }

    pub fn append_push(&self, event: &PushEvent) -> Result<i64> {
        let id = insert_push(&self.conn()?, event)?;
        count_appended("push", 1);
        Ok(id)
    }

    pub fn append_file(&self, event: &FilePresenceEvent) -> Result<i64> {
        let id = insert_file(&self.conn()?, event)?;
        count_appended("file", 1);
        Ok(id)
    }

    /// Appends every event in the batch or none of them.
    pub fn append_batch(&self, batch: &ProvenanceBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_batch(&tx, batch)?;
        tx.commit()?;
        count_batch(batch);
        Ok(batch.len())
    }

    /// Newest first by observed time, then id.
    pub fn pull_events(
        &self,
        scope: &StatusScope,
        limit: Option<u32>,
    ) -> Result<Vec<Stored<PullEvent>>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {PULL_COLUMNS} FROM data_pull WHERE {SCOPE_WHERE}
             ORDER BY pull_timestamp DESC, data_pull_id DESC LIMIT ?5"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                scope.project_id,
                scope.site_id,
                scope.data_source_name,
                scope.subject_id,
                sql_limit(limit)
            ],
            read_pull,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish_pull(row?)?);
        }
        Ok(out)
    }

    pub fn push_events(
        &self,
        scope: &StatusScope,
        limit: Option<u32>,
    ) -> Result<Vec<Stored<PushEvent>>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {PUSH_COLUMNS} FROM data_push WHERE {SCOPE_WHERE}
             ORDER BY push_timestamp DESC, data_push_id DESC LIMIT ?5"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                scope.project_id,
                scope.site_id,
                scope.data_source_name,
                scope.subject_id,
                sql_limit(limit)
            ],
            read_push,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish_push(row?)?);
        }
        Ok(out)
    }

    pub fn file_events(
        &self,
        scope: &StatusScope,
        limit: Option<u32>,
    ) -> Result<Vec<Stored<FilePresenceEvent>>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE {SCOPE_WHERE}
             ORDER BY m_time DESC, file_id DESC LIMIT ?5"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                scope.project_id,
                scope.site_id,
                scope.data_source_name,
                scope.subject_id,
                sql_limit(limit)
            ],
            read_file,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish_file(row?)?);
        }
        Ok(out)
    }

    /// Most recent presence event for each distinct file path.
    pub fn latest_files(
        &self,
        project_id: &str,
        site_id: &str,
        data_source_name: Option<&str>,
    ) -> Result<Vec<Stored<FilePresenceEvent>>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files f
             WHERE f.project_id = ?1 AND f.site_id = ?2
               AND (?3 IS NULL OR f.data_source_name = ?3)
               AND NOT EXISTS (
                 SELECT 1 FROM files g
                 WHERE g.project_id = f.project_id
                   AND g.site_id = f.site_id
                   AND g.data_source_name = f.data_source_name
                   AND g.file_path = f.file_path
                   AND (g.m_time > f.m_time OR (g.m_time = f.m_time AND g.file_id > f.file_id))
               )
             ORDER BY f.file_path"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id, site_id, data_source_name], read_file)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish_file(row?)?);
        }
        Ok(out)
    }

    /// Folds all three streams for the scope. Always reads fresh rows.
    pub fn sync_status(
        &self,
        scope: &StatusScope,
        granularity: Granularity,
    ) -> Result<Vec<SyncStatus>> {
        let pulls = self.pull_events(scope, None)?;
        let pushes = self.push_events(scope, None)?;
        let files = self.file_events(scope, None)?;
        Ok(reconcile(scope, granularity, &pulls, &pushes, &files))
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------

    pub async fn append_batch_async(&self, batch: ProvenanceBatch) -> Result<usize> {
        self.blocking(move |k| k.append_batch(&batch)).await
    }

    pub async fn pull_events_async(
        &self,
        scope: StatusScope,
        limit: Option<u32>,
    ) -> Result<Vec<Stored<PullEvent>>> {
        self.blocking(move |k| k.pull_events(&scope, limit)).await
    }

    pub async fn push_events_async(
        &self,
        scope: StatusScope,
        limit: Option<u32>,
    ) -> Result<Vec<Stored<PushEvent>>> {
        self.blocking(move |k| k.push_events(&scope, limit)).await
    }

    pub async fn file_events_async(
        &self,
        scope: StatusScope,
        limit: Option<u32>,
    ) -> Result<Vec<Stored<FilePresenceEvent>>> {
        self.blocking(move |k| k.file_events(&scope, limit)).await
    }

    pub async fn latest_files_async(
        &self,
        project_id: &str,
        site_id: &str,
        data_source_name: Option<&str>,
    ) -> Result<Vec<Stored<FilePresenceEvent>>> {
        let project_id = project_id.to_string();
        let site_id = site_id.to_string();
        let data_source_name = data_source_name.map(str::to_string);
        self.blocking(move |k| k.latest_files(&project_id, &site_id, data_source_name.as_deref()))
            .await
    }

    pub async fn sync_status_async(
        &self,
        scope: StatusScope,
        granularity: Granularity,
    ) -> Result<Vec<SyncStatus>> {
        self.blocking(move |k| k.sync_status(&scope, granularity))
            .await
    }
}
