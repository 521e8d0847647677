use std::sync::{Arc, Barrier};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use lochness_core::{
    ClaimFilter, Completion, Error, JobFilter, JobOutcome, JobStatus, JobType, NewJob,
};
use lochness_kernel::{Kernel, KernelError};
use serde_json::json;

fn kernel() -> (tempfile::TempDir, Kernel) {
    let dir = tempfile::tempdir().unwrap();
    let kernel = Kernel::open(dir.path()).unwrap();
    (dir, kernel)
}

fn pull_job() -> NewJob {
    NewJob::new("data_pull", "PRESCIENT", "JE").source("redcap_main")
}

#[test]
fn enqueued_job_is_immediately_visible_as_pending() {
    let (_dir, k) = kernel();
    let id = k
        .enqueue(pull_job().metadata(json!({"subject_id": "JE00001"})).requested_by("alice"))
        .unwrap();

    let jobs = k.query(&JobFilter::default()).unwrap();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.job_id, id);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.job_type, JobType::DataPull);
    assert_eq!(job.requested_by.as_deref(), Some("alice"));
    assert_eq!(job.metadata_str("subject_id"), Some("JE00001"));
    assert!(job.started_at.is_none());
    assert!(job.finished_at.is_none());
    assert!(job.result.is_none());
}

#[test]
fn invalid_enqueue_persists_nothing() {
    let (_dir, k) = kernel();
    k.enqueue(pull_job()).unwrap();
    let before = k.query(&JobFilter::default()).unwrap();

    let err = k
        .enqueue(NewJob::new("data_pull", "PRESCIENT", "  ").source("redcap_main"))
        .unwrap_err();
    assert!(matches!(err, KernelError::Domain(Error::Validation(_))), "{err:?}");
    assert_eq!(k.query(&JobFilter::default()).unwrap(), before);
}

#[test]
fn claim_runs_oldest_first_and_stamps_started_at() {
    let (_dir, k) = kernel();
    let first = k.enqueue(pull_job()).unwrap();
    let second = k
        .enqueue(NewJob::new("data_pull", "PRESCIENT", "LA").source("redcap_main"))
        .unwrap();

    let claimed = k.claim(&ClaimFilter::default()).unwrap().unwrap();
    assert_eq!(claimed.job_id, first);
    assert_eq!(claimed.status, JobStatus::Running);
    assert!(claimed.started_at.is_some());
    assert!(claimed.finished_at.is_none());

    let next = k.claim(&ClaimFilter::default()).unwrap().unwrap();
    assert_eq!(next.job_id, second);
    assert!(k.claim(&ClaimFilter::default()).unwrap().is_none());
}

#[test]
fn identical_scope_is_not_claimable_while_running() {
    let (_dir, k) = kernel();
    let first = k.enqueue(pull_job()).unwrap();
    let second = k.enqueue(pull_job()).unwrap();

    let running = k.claim(&ClaimFilter::default()).unwrap().unwrap();
    assert_eq!(running.job_id, first);
    assert!(k.claim(&ClaimFilter::default()).unwrap().is_none());
    assert_eq!(k.get(second).unwrap().unwrap().status, JobStatus::Pending);

    k.complete(first, &JobOutcome::success("ok")).unwrap();
    let next = k.claim(&ClaimFilter::default()).unwrap().unwrap();
    assert_eq!(next.job_id, second);
}

#[test]
fn scope_equality_is_null_aware() {
    let (_dir, k) = kernel();
    k.enqueue(NewJob::new("refresh_metadata", "PRESCIENT", "JE")).unwrap();
    k.enqueue(NewJob::new("refresh_metadata", "PRESCIENT", "JE")).unwrap();
    let other = k
        .enqueue(NewJob::new("refresh_metadata", "PRESCIENT", "JE").source("mindlamp"))
        .unwrap();

    assert!(k.claim(&ClaimFilter::default()).unwrap().is_some());
    // the second NULL-scoped job is blocked, the named one is not
    let next = k.claim(&ClaimFilter::default()).unwrap().unwrap();
    assert_eq!(next.job_id, other);
    assert!(k.claim(&ClaimFilter::default()).unwrap().is_none());
}

#[test]
fn claim_filter_narrows_candidates() {
    let (_dir, k) = kernel();
    k.enqueue(pull_job()).unwrap();
    let push = k
        .enqueue(NewJob::new("data_push", "PRESCIENT", "JE").sink("archive"))
        .unwrap();

    let filter = ClaimFilter {
        job_type: Some(JobType::DataPush),
        ..Default::default()
    };
    assert_eq!(k.claim(&filter).unwrap().unwrap().job_id, push);
    assert!(k.claim(&filter).unwrap().is_none());

    let elsewhere = ClaimFilter {
        site_id: Some("LA".into()),
        ..Default::default()
    };
    assert!(k.claim(&elsewhere).unwrap().is_none());
}

#[test]
fn concurrent_claims_have_exactly_one_winner() {
    let (_dir, k) = kernel();
    let id = k.enqueue(pull_job()).unwrap();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let k = k.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                k.claim(&ClaimFilter::default()).unwrap()
            })
        })
        .collect();
    let winners: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].job_id, id);
}

#[test]
fn complete_is_idempotent() {
    let (_dir, k) = kernel();
    let id = k.enqueue(pull_job()).unwrap();
    k.claim(&ClaimFilter::default()).unwrap().unwrap();

    let done = k.complete(id, &JobOutcome::success("3 files")).unwrap();
    let Completion::Completed(job) = done else {
        panic!("expected first completion to write");
    };
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.result.as_deref(), Some("3 files"));
    let finished_at = job.finished_at;
    assert!(finished_at.is_some());

    let again = k.complete(id, &JobOutcome::failure("late duplicate")).unwrap();
    let Completion::AlreadyTerminal(job) = again else {
        panic!("expected duplicate completion to be a no-op");
    };
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.result.as_deref(), Some("3 files"));
    assert_eq!(job.finished_at, finished_at);
}

#[test]
fn complete_rejects_pending_and_missing_jobs() {
    let (_dir, k) = kernel();
    let id = k.enqueue(pull_job()).unwrap();

    let err = k.complete(id, &JobOutcome::success("nope")).unwrap_err();
    assert!(matches!(
        err,
        KernelError::Domain(Error::InvalidTransition {
            from: JobStatus::Pending,
            to: JobStatus::Success,
            ..
        })
    ));
    assert_eq!(k.get(id).unwrap().unwrap().status, JobStatus::Pending);

    let err = k.complete(9_999, &JobOutcome::success("nope")).unwrap_err();
    assert!(matches!(err, KernelError::Domain(Error::NotFound(9_999))));
}

#[test]
fn reap_forces_stuck_jobs_to_error_and_frees_scope() {
    let (_dir, k) = kernel();
    let stuck = k.enqueue(pull_job()).unwrap();
    let waiting = k.enqueue(pull_job()).unwrap();
    k.claim(&ClaimFilter::default()).unwrap().unwrap();

    // nothing is old enough yet
    let cutoff = lochness_core::time::now() - ChronoDuration::hours(1);
    assert!(k.reap_stuck(cutoff, Duration::from_secs(3_600)).unwrap().is_empty());

    let cutoff = lochness_core::time::now() + ChronoDuration::seconds(1);
    let reaped = k.reap_stuck(cutoff, Duration::from_secs(30)).unwrap();
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].job_id, stuck);
    assert_eq!(reaped[0].status, JobStatus::Error);
    assert!(reaped[0].finished_at.is_some());
    let result = reaped[0].result.clone().unwrap();
    assert!(result.starts_with("stuck job timeout"), "{result}");
    assert!(result.ends_with("exceeded 30000ms"), "{result}");

    assert_eq!(k.claim(&ClaimFilter::default()).unwrap().unwrap().job_id, waiting);
}

#[test]
fn query_filters_combine_and_sort_newest_first() {
    let (_dir, k) = kernel();
    let a = k.enqueue(pull_job()).unwrap();
    let b = k
        .enqueue(NewJob::new("data_pull", "PRESCIENT", "JE").source("mindlamp"))
        .unwrap();
    let c = k
        .enqueue(NewJob::new("data_push", "PRESCIENT", "JE").sink("archive"))
        .unwrap();
    k.enqueue(NewJob::new("data_pull", "PRONET", "YA").source("redcap_main"))
        .unwrap();

    let site = JobFilter {
        project_id: Some("PRESCIENT".into()),
        site_id: Some("JE".into()),
        ..Default::default()
    };
    let ids: Vec<_> = k.query(&site).unwrap().iter().map(|j| j.job_id).collect();
    assert_eq!(ids, vec![c, b, a]);

    let pulls = JobFilter {
        job_type: Some(JobType::DataPull),
        data_source_name: Some("redcap_main".into()),
        project_id: Some("PRESCIENT".into()),
        ..Default::default()
    };
    let ids: Vec<_> = k.query(&pulls).unwrap().iter().map(|j| j.job_id).collect();
    assert_eq!(ids, vec![a]);

    k.claim(&ClaimFilter::default()).unwrap();
    let running = JobFilter {
        status: Some(JobStatus::Running),
        ..Default::default()
    };
    assert_eq!(k.query(&running).unwrap().len(), 1);
    assert_eq!(k.count_by_status(JobStatus::Pending).unwrap(), 3);

    let page = JobFilter {
        limit: 2,
        offset: 1,
        ..Default::default()
    };
    assert_eq!(k.query(&page).unwrap().len(), 2);
    assert_eq!(k.count(&page).unwrap(), 4);
    assert_eq!(k.count(&site).unwrap(), 3);
    assert_eq!(k.count(&running).unwrap(), 1);
}

#[test]
fn corrupt_job_metadata_is_reported_not_blanked() {
    let (_dir, k) = kernel();
    let id = k.enqueue(pull_job()).unwrap();
    let conn = rusqlite::Connection::open(k.db_path()).unwrap();
    conn.execute(
        "UPDATE jobs SET job_metadata = '{\"subject_id\":' WHERE job_id = ?1",
        [id],
    )
    .unwrap();

    let err = k.get(id).unwrap_err();
    assert!(matches!(err, KernelError::Corrupt(_)), "{err:?}");
    assert!(err.to_string().contains("not valid json"), "{err}");
    assert!(k.query(&JobFilter::default()).is_err());
}

#[test]
fn storage_enforces_lifecycle_invariants() {
    let (_dir, k) = kernel();
    let id = k.enqueue(pull_job()).unwrap();
    let conn = rusqlite::Connection::open(k.db_path()).unwrap();

    let bad_running = conn.execute(
        "UPDATE jobs SET status = 'running' WHERE job_id = ?1",
        [id],
    );
    assert!(bad_running.is_err(), "running without started_at must be rejected");

    let delete = conn.execute("DELETE FROM jobs WHERE job_id = ?1", [id]);
    assert!(delete.is_err(), "jobs are never deleted");
}

#[tokio::test]
async fn async_wrappers_round_trip() {
    let (_dir, k) = kernel();
    let id = k.enqueue_async(pull_job()).await.unwrap();
    let job = k.claim_async(&ClaimFilter::default()).await.unwrap().unwrap();
    assert_eq!(job.job_id, id);
    k.complete_async(id, JobOutcome::failure("boom")).await.unwrap();
    let job = k.get_async(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(k.count_by_status_async(JobStatus::Error).await.unwrap(), 1);
    assert_eq!(k.count_async(JobFilter::default()).await.unwrap(), 1);
}
