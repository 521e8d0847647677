use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn lochness(state: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("lochness").expect("binary");
    cmd.env_remove("LOCHNESS_CONFIG")
        .env_remove("LOCHNESS_STATE_DIR")
        .arg("--state-dir")
        .arg(state);
    cmd
}

#[test]
fn submit_list_show_round_through_the_ledger() {
    let state = tempfile::tempdir().unwrap();
    let out = lochness(state.path())
        .args([
            "jobs", "submit", "--job-type", "data_pull", "--project", "P", "--site", "S1",
            "--source", "share", "--metadata", r#"{"subject_id":"JE00001"}"#,
        ])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let submitted: Value = serde_json::from_slice(&out.stdout).unwrap();
    let job_id = submitted["job_id"].as_i64().unwrap();

    lochness(state.path())
        .args(["jobs", "list", "--json", "--status", "pending"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("\"job_id\":{job_id}")))
        .stdout(predicate::str::contains("\"total\":1"));

    lochness(state.path())
        .args(["jobs", "show", &job_id.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"subject_id\": \"JE00001\""));
}

#[test]
fn invalid_submission_fails_with_message() {
    let state = tempfile::tempdir().unwrap();
    lochness(state.path())
        .args(["jobs", "submit", "--job-type", " ", "--project", "P", "--site", "S"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("validation error"));
}

#[test]
fn show_unknown_job_fails() {
    let state = tempfile::tempdir().unwrap();
    lochness(state.path())
        .args(["jobs", "show", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("job 99 not found"));
}

#[test]
fn status_for_empty_site_reports_none() {
    let state = tempfile::tempdir().unwrap();
    lochness(state.path())
        .args(["status", "--project", "P", "--site", "S", "--subject", "JE00001", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pull_status\":\"None\""));
}

#[test]
fn connectors_lists_builtin_types() {
    let state = tempfile::tempdir().unwrap();
    lochness(state.path())
        .arg("connectors")
        .assert()
        .success()
        .stdout(predicate::str::contains("fileshare").and(predicate::str::contains("directory")));
}

#[test]
fn reap_with_nothing_running_is_empty() {
    let state = tempfile::tempdir().unwrap();
    lochness(state.path())
        .args(["reap", "--older-than-secs", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"reaped\":[]"));
}
