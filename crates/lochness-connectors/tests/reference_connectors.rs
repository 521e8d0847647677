use std::path::Path;

use lochness_connectors::{builtin_registry, DirectoryConnector, FileshareConnector};
use lochness_core::{
    Connector, DataSink, DataSource, Error, FailureClass, FileRef, ProvenanceRecorder,
    PullRequest, PushRequest,
};
use serde_json::{json, Value};

fn write(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

fn source(root: &Path, extra: Value) -> DataSource {
    let mut metadata = json!({ "root": root.to_string_lossy() });
    if let (Some(map), Value::Object(extra)) = (metadata.as_object_mut(), extra) {
        map.extend(extra);
    }
    DataSource {
        data_source_name: "share_main".into(),
        project_id: "PRESCIENT".into(),
        site_id: "JE".into(),
        data_source_type: "fileshare".into(),
        data_source_is_active: true,
        data_source_metadata: metadata,
    }
}

fn pull_request(source: DataSource, subject: Option<&str>) -> PullRequest {
    PullRequest {
        job_id: 1,
        source,
        subject_id: subject.map(str::to_string),
        job_metadata: json!({}),
        secret: None,
    }
}

#[tokio::test]
async fn fileshare_records_presence_and_pull_per_file() {
    let share = tempfile::tempdir().unwrap();
    write(&share.path().join("JE00001/visit1/a.csv"), "a");
    write(&share.path().join("JE00001/b.csv"), "bb");
    write(&share.path().join("JE00002/c.csv"), "ccc");
    write(&share.path().join("not a subject/d.csv"), "d");
    write(&share.path().join("loose.txt"), "ignored");

    let recorder = ProvenanceRecorder::for_job(1);
    FileshareConnector
        .pull(pull_request(source(share.path(), json!({})), None), &recorder)
        .await
        .unwrap();

    let batch = recorder.take();
    assert_eq!(batch.files.len(), 3);
    assert_eq!(batch.pulls.len(), 3);
    assert!(batch.pushes.is_empty());
    let subjects: Vec<_> = batch.pulls.iter().map(|p| p.subject_id.as_str()).collect();
    assert_eq!(subjects, vec!["JE00001", "JE00001", "JE00002"]);

    let a = batch
        .files
        .iter()
        .find(|f| f.file_path.ends_with("a.csv"))
        .unwrap();
    assert_eq!(a.file_md5.as_deref(), Some("0cc175b9c0f1b6a831c399e269772661"));
    assert!(a.file_size_mb.unwrap() > 0.0);
    assert!(batch.pulls.iter().all(|p| p.job_id == Some(1)));
    assert!(batch.pulls.iter().all(|p| p.data_source_name == "share_main"));
}

#[tokio::test]
async fn fileshare_can_target_one_subject_with_custom_pattern() {
    let share = tempfile::tempdir().unwrap();
    write(&share.path().join("JE00001/a.csv"), "a");
    write(&share.path().join("JE00002/b.csv"), "b");
    write(&share.path().join("tmp/c.csv"), "c");

    let meta = json!({ "subject_pattern": "^JE[0-9]{5}$" });
    let recorder = ProvenanceRecorder::detached();
    FileshareConnector
        .pull(pull_request(source(share.path(), meta), Some("JE00002")), &recorder)
        .await
        .unwrap();
    let batch = recorder.take();
    assert_eq!(batch.pulls.len(), 1);
    assert_eq!(batch.pulls[0].subject_id, "JE00002");
}

#[tokio::test]
async fn fileshare_missing_root_is_permanent() {
    let share = tempfile::tempdir().unwrap();
    let gone = share.path().join("gone");
    let recorder = ProvenanceRecorder::detached();
    let err = FileshareConnector
        .pull(pull_request(source(&gone, json!({})), None), &recorder)
        .await
        .unwrap_err();
    assert_eq!(err.failure_class(), Some(FailureClass::Permanent));
    assert!(recorder.is_empty());
}

#[test]
fn fileshare_validates_pattern() {
    let bad = json!({ "root": "/srv", "subject_pattern": "([" });
    assert!(matches!(
        FileshareConnector.validate(&bad),
        Err(Error::Validation(_))
    ));
    assert!(FileshareConnector.validate(&json!({ "root": "/srv" })).is_ok());
}

fn sink(root: &Path) -> DataSink {
    DataSink {
        data_sink_id: 9,
        data_sink_name: "archive".into(),
        project_id: "PRESCIENT".into(),
        site_id: "JE".into(),
        data_sink_type: "directory".into(),
        data_sink_metadata: json!({ "root": root.to_string_lossy() }),
    }
}

#[tokio::test]
async fn directory_copies_file_and_records_push() {
    let share = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let file = share.path().join("JE00001/a.csv");
    write(&file, "a");

    let recorder = ProvenanceRecorder::for_job(5);
    let req = PushRequest {
        job_id: 5,
        sink: sink(out.path()),
        file: FileRef {
            path: file.to_string_lossy().into_owned(),
            md5: None,
            subject_id: Some("JE00001".into()),
            data_source_name: Some("share_main".into()),
        },
        job_metadata: json!({}),
        secret: None,
    };
    DirectoryConnector.push(req, &recorder).await.unwrap();

    let copied = out.path().join("PRESCIENT/JE/JE00001/a.csv");
    assert_eq!(std::fs::read_to_string(&copied).unwrap(), "a");
    let batch = recorder.take();
    assert_eq!(batch.pushes.len(), 1);
    let push = &batch.pushes[0];
    assert_eq!(push.data_sink_type, "directory");
    assert_eq!(push.data_sink_id, 9);
    assert_eq!(push.file_md5, "0cc175b9c0f1b6a831c399e269772661");
    assert_eq!(push.job_id, Some(5));
    assert_eq!(push.data_source_name.as_deref(), Some("share_main"));
}

#[tokio::test]
async fn directory_rejects_missing_file_without_recording() {
    let out = tempfile::tempdir().unwrap();
    let recorder = ProvenanceRecorder::detached();
    let req = PushRequest {
        job_id: 1,
        sink: sink(out.path()),
        file: FileRef {
            path: out.path().join("nope.csv").to_string_lossy().into_owned(),
            md5: None,
            subject_id: None,
            data_source_name: None,
        },
        job_metadata: json!({}),
        secret: None,
    };
    let err = DirectoryConnector.push(req, &recorder).await.unwrap_err();
    assert_eq!(err.failure_class(), Some(FailureClass::Permanent));
    assert!(recorder.is_empty());
}

#[test]
fn sources_cannot_push_and_sinks_cannot_pull() {
    let registry = builtin_registry();
    let fileshare = registry.get("fileshare").ok().unwrap();
    let directory = registry.get("directory").ok().unwrap();
    assert!(fileshare.capabilities().pull && !fileshare.capabilities().push);
    assert!(directory.capabilities().push && !directory.capabilities().pull);
}
