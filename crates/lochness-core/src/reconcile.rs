//! Sync status as a pure fold over the three provenance streams.
//!
//! Each stream is grouped by `(subject_id, data_source_name)` and reduced on
//! its own with count + latest. The streams are never joined, so the result
//! does not depend on the order events arrived in.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provenance::{FilePresenceEvent, PullEvent, PushEvent, Stored};

/// Target of a status query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusScope {
    pub project_id: String,
    pub site_id: String,
    #[serde(default)]
    pub data_source_name: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
}

impl StatusScope {
    pub fn new(project_id: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            site_id: site_id.into(),
            ..Default::default()
        }
    }

    pub fn source(mut self, name: impl Into<String>) -> Self {
        self.data_source_name = Some(name.into());
        self
    }

    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Per-subject when a subject is pinned, per-source otherwise.
    pub fn default_granularity(&self) -> Granularity {
        if self.subject_id.is_some() {
            Granularity::Subject
        } else {
            Granularity::Source
        }
    }

    fn admits(
        &self,
        project_id: &str,
        site_id: &str,
        subject: Option<&str>,
        source: Option<&str>,
    ) -> bool {
        project_id == self.project_id
            && site_id == self.site_id
            && matches_opt(self.subject_id.as_deref(), subject)
            && matches_opt(self.data_source_name.as_deref(), source)
    }
}

fn matches_opt(want: Option<&str>, have: Option<&str>) -> bool {
    match want {
        None => true,
        Some(w) => have == Some(w),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One record per `(subject_id, data_source_name)`.
    Subject,
    /// One record per `data_source_name`, rolled up across subjects.
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    Success,
    None,
}

impl StreamStatus {
    fn from_count(count: u64) -> Self {
        if count > 0 {
            StreamStatus::Success
        } else {
            StreamStatus::None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkSummary {
    pub count: u64,
    pub last: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub project_id: String,
    pub site_id: String,
    pub subject_id: Option<String>,
    pub data_source_name: Option<String>,
    pub pull_status: StreamStatus,
    pub last_pull: Option<DateTime<Utc>>,
    pub pull_count: u64,
    pub push_status: StreamStatus,
    pub last_push: Option<DateTime<Utc>>,
    pub push_count: u64,
    pub push_sinks: BTreeMap<String, SinkSummary>,
    pub file_count: u64,
    pub last_file: Option<DateTime<Utc>>,
    pub latest_file_path: Option<String>,
}

type GroupKey = (Option<String>, Option<String>);

/// Count plus the latest `(timestamp, id)` seen. Ties on time go to the
/// higher id.
#[derive(Debug, Clone, Default)]
struct Tally<P> {
    count: u64,
    latest: Option<(DateTime<Utc>, i64, P)>,
}

impl<P> Tally<P> {
    fn observe(&mut self, at: DateTime<Utc>, id: i64, payload: P) {
        self.count += 1;
        let newer = match &self.latest {
            None => true,
            Some((ts, seen, _)) => (at, id) > (*ts, *seen),
        };
        if newer {
            self.latest = Some((at, id, payload));
        }
    }

    fn last(&self) -> Option<DateTime<Utc>> {
        self.latest.as_ref().map(|(ts, _, _)| *ts)
    }
}

#[derive(Debug, Default)]
struct Group {
    pulls: Tally<()>,
    pushes: Tally<()>,
    sinks: BTreeMap<String, Tally<()>>,
    files: Tally<String>,
}

fn group_key(granularity: Granularity, subject: Option<&str>, source: Option<&str>) -> GroupKey {
    let subject = match granularity {
        Granularity::Subject => subject.map(str::to_string),
        Granularity::Source => None,
    };
    (subject, source.map(str::to_string))
}

/// Key that is fully determined by the scope, if any. Such a group is
/// always reported, even with no events.
fn pinned_key(scope: &StatusScope, granularity: Granularity) -> Option<GroupKey> {
    let source = scope.data_source_name.clone()?;
    match granularity {
        Granularity::Source => Some((None, Some(source))),
        Granularity::Subject => scope.subject_id.clone().map(|s| (Some(s), Some(source))),
    }
}

pub fn reconcile(
    scope: &StatusScope,
    granularity: Granularity,
    pulls: &[Stored<PullEvent>],
    pushes: &[Stored<PushEvent>],
    files: &[Stored<FilePresenceEvent>],
) -> Vec<SyncStatus> {
    let mut groups: BTreeMap<GroupKey, Group> = BTreeMap::new();
    if let Some(key) = pinned_key(scope, granularity) {
        groups.entry(key).or_default();
    }

    for Stored { id, event } in pulls {
        let subject = Some(event.subject_id.as_str());
        let source = Some(event.data_source_name.as_str());
        if !scope.admits(&event.project_id, &event.site_id, subject, source) {
            continue;
        }
        groups
            .entry(group_key(granularity, subject, source))
            .or_default()
            .pulls
            .observe(event.pull_timestamp, *id, ());
    }

    for Stored { id, event } in pushes {
        let subject = event.subject_id.as_deref();
        let source = event.data_source_name.as_deref();
        if !scope.admits(&event.project_id, &event.site_id, subject, source) {
            continue;
        }
        let group = groups
            .entry(group_key(granularity, subject, source))
            .or_default();
        group.pushes.observe(event.push_timestamp, *id, ());
        group
            .sinks
            .entry(event.data_sink_type.clone())
            .or_default()
            .observe(event.push_timestamp, *id, ());
    }

    for Stored { id, event } in files {
        let subject = Some(event.subject_id.as_str());
        let source = Some(event.data_source_name.as_str());
        if !scope.admits(&event.project_id, &event.site_id, subject, source) {
            continue;
        }
        groups
            .entry(group_key(granularity, subject, source))
            .or_default()
            .files
            .observe(event.m_time, *id, event.file_path.clone());
    }

    groups
        .into_iter()
        .map(|((subject_id, data_source_name), group)| SyncStatus {
            project_id: scope.project_id.clone(),
            site_id: scope.site_id.clone(),
            subject_id,
            data_source_name,
            pull_status: StreamStatus::from_count(group.pulls.count),
            last_pull: group.pulls.last(),
            pull_count: group.pulls.count,
            push_status: StreamStatus::from_count(group.pushes.count),
            last_push: group.pushes.last(),
            push_count: group.pushes.count,
            push_sinks: group
                .sinks
                .iter()
                .filter_map(|(sink_type, tally)| {
                    tally.last().map(|last| {
                        (
                            sink_type.clone(),
                            SinkSummary {
                                count: tally.count,
                                last,
                            },
                        )
                    })
                })
                .collect(),
            file_count: group.files.count,
            last_file: group.files.last(),
            latest_file_path: group.files.latest.map(|(_, _, path)| path),
        })
        .collect()
}
