use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use canvas2toml::{
    GradeDocument, ResolvedIdentity, SyncError,
    backup::BackupManager,
    canvas::{CurrentGrade, GradingApi},
    codec,
    upload::{AbortReason, CallStatus, RecordOutcome, Reconciler, UploadOutcome, UploadState},
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Lookup(String),
    Read(String),
    Grade(String, f64),
    Comment(String, String, Option<i64>),
}

impl Call {
    fn mutates(&self) -> bool {
        matches!(self, Call::Grade(..) | Call::Comment(..))
    }
}

#[derive(Default)]
struct RecordingApi {
    calls:         Mutex<Vec<Call>>,
    remote:        HashMap<String, CurrentGrade>,
    users:         HashMap<String, i64>,
    reject_grades: Vec<String>,
    reads_fail:    bool,
    lookups_fail:  bool,
    /// Directory whose backups are inspected whenever a write arrives.
    watch:         Option<PathBuf>,
    /// Submissions found in backup files at the moment of each write.
    backed_up:     Mutex<Vec<usize>>,
}

impl RecordingApi {
    fn with_remote(mut self, key: &str, score: Option<f64>, comment: Option<&str>) -> Self {
        self.remote.insert(key.into(), CurrentGrade {
            score,
            comment: comment.map(str::to_string),
            ..CurrentGrade::default()
        });
        self
    }

    fn with_attempt(mut self, key: &str, attempt: i64) -> Self {
        self.remote.entry(key.into()).or_default().attempt = Some(attempt);
        self
    }

    fn with_user(mut self, key: &str, id: i64) -> Self {
        self.users.insert(key.into(), id);
        self
    }

    fn watching(mut self, dir: &Path) -> Self {
        self.watch = Some(dir.to_path_buf());
        self
    }

    fn rejecting_grade(mut self, key: &str) -> Self {
        self.reject_grades.push(key.into());
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: Call) {
        if call.mutates() {
            if let Some(dir) = &self.watch {
                let records = backups_in(dir)
                    .iter()
                    .filter_map(|path| codec::read(path).ok())
                    .map(|snapshot| snapshot.submissions.len())
                    .sum();
                self.backed_up.lock().expect("backup lock").push(records);
            }
        }
        self.calls.lock().expect("calls lock").push(call);
    }

    fn backed_up(&self) -> Vec<usize> {
        self.backed_up.lock().expect("backup lock").clone()
    }
}

impl GradingApi for RecordingApi {
    async fn resolve_user(
        &self,
        identity: &ResolvedIdentity,
    ) -> canvas2toml::Result<Option<i64>> {
        let key = identity.remote_key();
        self.record(Call::Lookup(key.clone()));
        if self.lookups_fail {
            return Err(SyncError::Api("403 Forbidden".into()));
        }
        Ok(self.users.get(&key).copied())
    }

    async fn get_current_grade(
        &self,
        _assignment_id: i64,
        identity: &ResolvedIdentity,
    ) -> canvas2toml::Result<CurrentGrade> {
        let key = identity.remote_key();
        self.record(Call::Read(key.clone()));
        if self.reads_fail {
            return Err(SyncError::Api("503 Service Unavailable".into()));
        }
        Ok(self.remote.get(&key).cloned().unwrap_or_default())
    }

    async fn post_grade(
        &self,
        _assignment_id: i64,
        identity: &ResolvedIdentity,
        score: f64,
    ) -> canvas2toml::Result<()> {
        let key = identity.remote_key();
        self.record(Call::Grade(key.clone(), score));
        if self.reject_grades.contains(&key) {
            return Err(SyncError::Api("400 Bad Request".into()));
        }
        Ok(())
    }

    async fn post_comment(
        &self,
        _assignment_id: i64,
        identity: &ResolvedIdentity,
        html: &str,
        attempt: Option<i64>,
    ) -> canvas2toml::Result<()> {
        self.record(Call::Comment(identity.remote_key(), html.to_string(), attempt));
        Ok(())
    }
}

fn temp_root() -> PathBuf {
    let root = std::env::temp_dir().join(format!("canvas2toml-upload-{}", Uuid::new_v4()));
    fs::create_dir_all(&root).expect("create temp root");
    root
}

fn backups_in(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .expect("list dir")
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.to_string_lossy().contains("_backup_"))
        .collect()
}

fn worked_example() -> GradeDocument {
    codec::parse(
        r#"
assignment_id = 501

[[submission]]
sis_id = "s1"
score = 9.5
comment = "Good job"

[[submission]]
user_id = "42"
score = 7
"#,
    )
    .expect("parse")
}

#[tokio::test]
async fn worked_example_uploads_and_backs_up() {
    let root = temp_root();
    let api = RecordingApi::default()
        .with_remote("sis_user_id:s1", Some(6.0), Some("needs work"))
        .with_remote("42", Some(3.0), None);
    let doc = worked_example();

    let mut asked = None;
    let outcome = Reconciler::builder()
        .api(&api)
        .confirm(|n: usize| {
            asked = Some(n);
            true
        })
        .backups(BackupManager::for_source(&root.join("hw1.toml")))
        .build()
        .run(&doc)
        .await
        .expect("upload");
    assert_eq!(asked, Some(2));

    let UploadOutcome::Done(summary) = outcome else {
        panic!("expected DONE");
    };
    assert_eq!(summary.applied(), 2);
    assert_eq!(summary.failed(), 0);
    assert!(summary.totals().starts_with("2 applied"));

    let calls = api.calls();
    let grades = calls.iter().filter(|c| matches!(c, Call::Grade(..))).count();
    let comments = calls.iter().filter(|c| matches!(c, Call::Comment(..))).count();
    assert_eq!((grades, comments), (2, 1));
    assert!(calls.contains(&Call::Grade("sis_user_id:s1".into(), 9.5)));
    assert!(calls.contains(&Call::Grade("42".into(), 7.0)));
    assert!(calls.contains(&Call::Comment(
        "sis_user_id:s1".into(),
        "<p>Good job</p>".into(),
        None
    )));

    let backup_path = summary.backup.clone().expect("backup path");
    assert_eq!(backups_in(&root), vec![backup_path.clone()]);
    let snapshot = codec::read(&backup_path).expect("read backup");
    assert_eq!(snapshot.assignment_id, 501);
    assert_eq!(snapshot.submissions.len(), 2);
    assert_eq!(snapshot.submissions[0].score, Some(6.0));
    assert_eq!(
        snapshot.submissions[0].comment,
        Some(canvas2toml::Comment::Text("needs work".into()))
    );
    assert_eq!(snapshot.submissions[1].score, Some(3.0));
    assert_eq!(snapshot.submissions[1].comment, None);
    assert_eq!(
        snapshot.metadata.get("source").and_then(toml::Value::as_str),
        Some("hw1.toml")
    );

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn every_read_happens_before_the_first_write() {
    let root = temp_root();
    let api = RecordingApi::default();
    Reconciler::builder()
        .api(&api)
        .confirm(|_: usize| true)
        .backups(BackupManager::for_source(&root.join("hw1.toml")))
        .build()
        .run(&worked_example())
        .await
        .expect("upload");

    let calls = api.calls();
    let first_write = calls.iter().position(Call::mutates).expect("some write");
    let last_read = calls.iter().rposition(|c| !c.mutates()).expect("some read");
    assert!(last_read < first_write, "{calls:?}");
    assert_eq!(first_write, 3);

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn backup_is_on_disk_before_each_write() {
    let root = temp_root();
    let api = RecordingApi::default().watching(&root);
    Reconciler::builder()
        .api(&api)
        .confirm(|_: usize| true)
        .backups(BackupManager::for_source(&root.join("hw1.toml")))
        .build()
        .run(&worked_example())
        .await
        .expect("upload");

    // two grades and one comment, each seeing the complete two-record backup
    assert_eq!(api.backed_up(), vec![2, 2, 2]);

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn sis_identities_are_sent_to_the_looked_up_canvas_id() {
    let root = temp_root();
    let doc = codec::parse(
        r#"
assignment_id = 501

[[submission]]
sis_id = "s1"
score = 9
comment = "Good job"

[[submission]]
sis_login_id = "grace"
score = 8

[[submission]]
sis_id = "s1"
comment = "Also this"
"#,
    )
    .expect("parse");
    let api = RecordingApi::default()
        .with_user("sis_user_id:s1", 42)
        .with_attempt("42", 3);

    let outcome = Reconciler::builder()
        .api(&api)
        .confirm(|_: usize| true)
        .backups(BackupManager::for_source(&root.join("hw.toml")))
        .build()
        .run(&doc)
        .await
        .expect("upload");
    let UploadOutcome::Done(summary) = outcome else {
        panic!("expected DONE");
    };
    assert_eq!(summary.applied(), 3);

    assert_eq!(api.calls(), vec![
        Call::Lookup("sis_user_id:s1".into()),
        Call::Lookup("sis_login_id:grace".into()),
        Call::Read("42".into()),
        Call::Read("sis_login_id:grace".into()),
        Call::Read("42".into()),
        Call::Grade("42".into(), 9.0),
        Call::Comment("42".into(), "<p>Good job</p>".into(), Some(3)),
        Call::Grade("sis_login_id:grace".into(), 8.0),
        Call::Comment("42".into(), "<p>Also this</p>".into(), Some(3)),
    ]);

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn failed_lookups_fall_back_to_the_sis_key() {
    let root = temp_root();
    let api = RecordingApi {
        lookups_fail: true,
        ..RecordingApi::default()
    };

    let outcome = Reconciler::builder()
        .api(&api)
        .confirm(|_: usize| true)
        .backups(BackupManager::for_source(&root.join("hw1.toml")))
        .build()
        .run(&worked_example())
        .await
        .expect("upload");
    let UploadOutcome::Done(summary) = outcome else {
        panic!("expected DONE");
    };
    assert_eq!(summary.applied(), 2);
    assert!(api.calls().contains(&Call::Grade("sis_user_id:s1".into(), 9.5)));

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn one_rejected_record_does_not_stop_the_batch() {
    let root = temp_root();
    let doc = codec::parse(
        r#"
assignment_id = 501

[[submission]]
id = 1
score = 1

[[submission]]
id = 2
score = 2
comment = "ok"

[[submission]]
id = 3
score = 3
"#,
    )
    .expect("parse");
    let api = RecordingApi::default().rejecting_grade("2");

    let outcome = Reconciler::builder()
        .api(&api)
        .confirm(|_: usize| true)
        .backups(BackupManager::for_source(&root.join("hw.toml")))
        .build()
        .run(&doc)
        .await
        .expect("upload");
    let UploadOutcome::Done(summary) = outcome else {
        panic!("expected DONE");
    };

    assert_eq!(summary.results.len(), 3);
    assert_eq!(summary.results[0].outcome(), RecordOutcome::Applied);
    assert_eq!(summary.results[1].outcome(), RecordOutcome::Partial);
    assert!(summary.results[1].score.is_failed());
    assert_eq!(summary.results[1].comment, CallStatus::Applied);
    assert_eq!(summary.results[2].outcome(), RecordOutcome::Applied);
    assert_eq!((summary.applied(), summary.partial(), summary.failed()), (2, 1, 0));
    assert!(api.calls().contains(&Call::Grade("3".into(), 3.0)));

    let rendered = summary.render();
    assert!(rendered.contains("Upload Summary"));
    assert!(rendered.contains("partial"));

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn records_without_changes_are_skipped() {
    let root = temp_root();
    let doc = codec::parse(
        r#"
assignment_id = 501

[[submission]]
id = 1
score = 4

[[submission]]
id = 2
comment = "   "

[[submission]]
id = 3
"#,
    )
    .expect("parse");
    let api = RecordingApi::default();

    let outcome = Reconciler::builder()
        .api(&api)
        .confirm(|n: usize| n == 1)
        .backups(BackupManager::for_source(&root.join("hw.toml")))
        .build()
        .run(&doc)
        .await
        .expect("upload");
    let UploadOutcome::Done(summary) = outcome else {
        panic!("expected DONE");
    };

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.results.len(), 1);
    assert_eq!(api.calls(), vec![Call::Read("1".into()), Call::Grade("1".into(), 4.0)]);

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn declining_makes_no_remote_calls() {
    let root = temp_root();
    let api = RecordingApi::default();

    let outcome = Reconciler::builder()
        .api(&api)
        .confirm(|_: usize| false)
        .backups(BackupManager::for_source(&root.join("hw1.toml")))
        .build()
        .run(&worked_example())
        .await
        .expect("decline is not an error");

    match outcome {
        UploadOutcome::Aborted { at, reason } => {
            assert_eq!(at, UploadState::Confirmed);
            assert_eq!(reason, AbortReason::Declined);
        }
        other => panic!("expected ABORTED, got {other:?}"),
    }
    assert!(api.calls().is_empty());
    assert!(backups_in(&root).is_empty());

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn failed_backup_aborts_before_any_write() {
    let root = temp_root();
    let api = RecordingApi {
        reads_fail: true,
        ..RecordingApi::default()
    };

    let err = Reconciler::builder()
        .api(&api)
        .confirm(|_: usize| true)
        .backups(BackupManager::for_source(&root.join("hw1.toml")))
        .build()
        .run(&worked_example())
        .await
        .expect_err("backup must fail");

    assert!(matches!(err, SyncError::BackupFailed { .. }), "{err:?}");
    assert!(api.calls().iter().all(|c| !c.mutates()));
    assert!(backups_in(&root).is_empty());

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn unresolvable_records_are_reported_not_sent() {
    let root = temp_root();
    let doc = codec::parse(
        r#"
assignment_id = 501

[[submission]]
name = "Mystery Student"
score = 5

[[submission]]
id = 2
score = 2
"#,
    )
    .expect("parse");
    let api = RecordingApi::default();

    let outcome = Reconciler::builder()
        .api(&api)
        .confirm(|n: usize| n == 1)
        .backups(BackupManager::for_source(&root.join("hw.toml")))
        .build()
        .run(&doc)
        .await
        .expect("upload");
    let UploadOutcome::Done(summary) = outcome else {
        panic!("expected DONE");
    };

    assert_eq!(summary.unresolvable.len(), 1);
    assert_eq!(summary.unresolvable[0].label, "#1 (Mystery Student)");
    assert_eq!(summary.applied(), 1);
    assert_eq!(api.calls(), vec![Call::Read("2".into()), Call::Grade("2".into(), 2.0)]);

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn nothing_to_upload_skips_the_prompt() {
    let root = temp_root();
    let doc = codec::parse("assignment_id = 501\n[[submission]]\nid = 1\n").expect("parse");
    let api = RecordingApi::default();

    let outcome = Reconciler::builder()
        .api(&api)
        .confirm(|_: usize| -> bool { panic!("must not ask") })
        .backups(BackupManager::for_source(&root.join("hw.toml")))
        .build()
        .run(&doc)
        .await
        .expect("upload");

    let UploadOutcome::Done(summary) = outcome else {
        panic!("expected DONE");
    };
    assert!(summary.results.is_empty());
    assert!(summary.backup.is_none());
    assert!(api.calls().is_empty());
    assert!(backups_in(&root).is_empty());

    let _ = fs::remove_dir_all(root);
}
