#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};

use crate::{
    canvas::{CurrentGrade, GradingApi},
    codec,
    constants::BACKUP_TIMESTAMP_FORMAT,
    document::{Comment, GradeDocument, SubmissionRecord},
    error::{Result, SyncError},
    upload::BatchEntry,
};

/// A snapshot that has been persisted.
#[derive(Debug, Clone)]
pub struct BackupSnapshot {
    /// Where the snapshot was written.
    pub path:     PathBuf,
    /// What was written.
    pub document: GradeDocument,
    /// Remote state per batch entry, in batch order.
    pub current:  Vec<CurrentGrade>,
}

/// Captures remote score/comment state before an upload mutates it.
#[derive(Debug, Clone)]
pub struct BackupManager {
    /// Directory backups are written to.
    dir:         PathBuf,
    /// File stem of the source document.
    stem:        String,
    /// File name of the source document, recorded in the snapshot.
    source_name: String,
}

impl BackupManager {
    /// Backups for `source` go next to it as
    /// `<stem>_backup_<timestamp>.toml`.
    pub fn for_source(source: &Path) -> Self {
        let dir = source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "grades".into());
        let source_name = source
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| stem.clone());
        Self {
            dir,
            stem,
            source_name,
        }
    }

    /// First unused backup path for `at`. Existing files are never reused.
    pub fn path_for(&self, at: DateTime<Local>) -> PathBuf {
        let base = format!("{}_backup_{}", self.stem, at.format(BACKUP_TIMESTAMP_FORMAT));
        let mut candidate = self.dir.join(format!("{base}.toml"));
        let mut n = 1;
        while candidate.exists() {
            candidate = self.dir.join(format!("{base}_{n}.toml"));
            n += 1;
        }
        candidate
    }

    /// Queries the remote state of every batch entry and persists it.
    ///
    /// Nothing is mutated remotely here; any failure is reported as
    /// [`SyncError::BackupFailed`] and leaves no partial file behind.
    pub async fn capture<A: GradingApi>(
        &self,
        api: &A,
        doc: &GradeDocument,
        batch: &[BatchEntry<'_>],
    ) -> Result<BackupSnapshot> {
        let now = Local::now();
        let path = self.path_for(now);
        let failed = |reason: String| SyncError::BackupFailed {
            path: path.clone(),
            reason,
        };

        let mut snapshot = GradeDocument::new(doc.assignment_id);
        snapshot.quiz_id = doc.quiz_id;
        snapshot
            .metadata
            .insert("source".into(), toml::Value::String(self.source_name.clone()));
        snapshot
            .metadata
            .insert("captured_at".into(), toml::Value::String(now.to_rfc3339()));

        let mut grades = Vec::with_capacity(batch.len());
        for entry in batch {
            let current = api
                .get_current_grade(doc.assignment_id, &entry.target)
                .await
                .map_err(|e| failed(format!("could not read {}: {e}", entry.identity)))?;
            let mut record = SubmissionRecord {
                identities: entry.record.identities.clone(),
                name: entry.record.name.clone(),
                score: current.score,
                ..SubmissionRecord::default()
            };
            record.comment = current.comment.clone().map(Comment::Text);
            snapshot.submissions.push(record);
            grades.push(current);
        }

        let text = codec::serialize(&snapshot).map_err(|e| failed(e.to_string()))?;
        write_new_file(&path, text.as_bytes()).map_err(|e| failed(e.to_string()))?;
        tracing::info!(
            "Backed up {} submission(s) to {}",
            snapshot.submissions.len(),
            path.display()
        );

        Ok(BackupSnapshot {
            path,
            document: snapshot,
            current: grades,
        })
    }
}

/// Writes `bytes` to a temporary sibling, syncs it, then links it into place.
///
/// The hard link fails with `AlreadyExists` instead of replacing a file that
/// appeared in the meantime.
fn write_new_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

    let written = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
        fs::hard_link(&tmp, path)
    })();
    let _ = fs::remove_file(&tmp);

    written?;
    sync_parent_dir(dir)
}

/// Makes the new directory entry durable on Unix.
fn sync_parent_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("canvas2toml-backup-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn backup_names_never_collide() {
        let dir = temp_dir();
        let manager = BackupManager::for_source(&dir.join("hw1.toml"));
        let at = Local::now();

        let first = manager.path_for(at);
        write_new_file(&first, b"a").expect("first write");
        let second = manager.path_for(at);
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("_1.toml"));

        let err = write_new_file(&first, b"b").expect_err("must not overwrite");
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&first).expect("read"), "a");
        let leftovers = fs::read_dir(&dir)
            .expect("list")
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn a_file_that_appears_after_naming_is_kept() {
        let dir = temp_dir();
        let manager = BackupManager::for_source(&dir.join("hw1.toml"));
        let path = manager.path_for(Local::now());
        fs::write(&path, "someone else").expect("competing write");

        let err = write_new_file(&path, b"snapshot").expect_err("must not clobber");
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&path).expect("read"), "someone else");
        assert_eq!(fs::read_dir(&dir).expect("list").count(), 1);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn backups_sit_next_to_the_source() {
        let manager = BackupManager::for_source(Path::new("grades/hw1.toml"));
        let path = manager.path_for(Local::now());
        assert_eq!(path.parent(), Some(Path::new("grades")));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("hw1_backup_"));
    }
}
