#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Grader comments and their HTML rendering.
pub mod comment;
/// Identity variants and the precedence resolver.
pub mod identity;

use std::collections::BTreeMap;

pub use comment::Comment;
pub use identity::{IdentityKind, ResolvedIdentity, resolve};

use crate::error::{Result, SyncError};

/// One gradable unit (assignment or quiz) and its submissions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GradeDocument {
    /// Every top-level key that is not interpreted (`grading_info`, `title`,
    /// quiz prompts, ...), in file order.
    pub metadata:      toml::Table,
    /// Canvas assignment id. Quizzes are graded through their assignment.
    pub assignment_id: i64,
    /// Canvas quiz id, for quiz-sourced documents.
    pub quiz_id:       Option<i64>,
    /// Submissions in display order.
    pub submissions:   Vec<SubmissionRecord>,
}

impl GradeDocument {
    /// Creates an empty document for an assignment.
    pub fn new(assignment_id: i64) -> Self {
        Self {
            assignment_id,
            ..Self::default()
        }
    }

    /// Full validation: structure plus an addressable identity on every
    /// record. Used before writing documents on the download path.
    pub fn validate(&self) -> Result<()> {
        self.validate_structure()?;
        for (index, record) in self.submissions.iter().enumerate() {
            if resolve(record).is_err() {
                return Err(SyncError::schema(format!(
                    "submission {} has no usable identity field",
                    record.label(index)
                )));
            }
        }
        Ok(())
    }

    /// Validation without the identity check. On the upload path a missing
    /// identity is a per-record problem, not a document one.
    pub fn validate_structure(&self) -> Result<()> {
        if self.assignment_id <= 0 {
            return Err(SyncError::schema(format!(
                "assignment_id must be a positive integer, got {}",
                self.assignment_id
            )));
        }
        if let Some(quiz_id) = self.quiz_id.filter(|id| *id <= 0) {
            return Err(SyncError::schema(format!(
                "quiz_id must be a positive integer, got {quiz_id}"
            )));
        }
        if self.submissions.is_empty() {
            return Err(SyncError::schema("document has no [[submission]] entries"));
        }
        for (index, record) in self.submissions.iter().enumerate() {
            if record.score.is_some_and(|score| !score.is_finite()) {
                return Err(SyncError::schema(format!(
                    "score of submission {} is not a finite number",
                    record.label(index)
                )));
            }
            if let Some((n, _)) = record.question_points.iter().find(|(_, p)| !p.is_finite()) {
                return Err(SyncError::schema(format!(
                    "q{n}_points of submission {} is not a finite number",
                    record.label(index)
                )));
            }
        }
        Ok(())
    }

    /// Sorts submissions by [`SubmissionRecord::display_key`].
    pub fn sort_submissions(&mut self) {
        self.submissions.sort_by_cached_key(SubmissionRecord::display_key);
    }
}

/// One student's entry in a grade document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubmissionRecord {
    /// Identity fields present on the record.
    pub identities:      BTreeMap<IdentityKind, String>,
    /// Student display name; absent when anonymized.
    pub name:            Option<String>,
    /// Score to post. `None` leaves the remote score alone.
    pub score:           Option<f64>,
    /// Comment to post.
    pub comment:         Option<Comment>,
    /// Relative path of a downloaded attachment. Never uploaded.
    pub file:            Option<String>,
    /// Per-question points keyed by question number (`qN_points`).
    pub question_points: BTreeMap<u32, f64>,
    /// Any other keys, written back untouched.
    pub extra:           toml::Table,
}

impl SubmissionRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an identity field.
    pub fn with_identity(mut self, kind: IdentityKind, value: impl Into<String>) -> Self {
        self.identities.insert(kind, value.into());
        self
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the score.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Sets the comment.
    pub fn with_comment(mut self, comment: Comment) -> Self {
        self.comment = Some(comment);
        self
    }

    /// Sets the attachment path.
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Sets points for question `n`.
    pub fn with_question_points(mut self, n: u32, points: f64) -> Self {
        self.question_points.insert(n, points);
        self
    }

    /// Value of one identity field, if present.
    pub fn identity(&self, kind: IdentityKind) -> Option<&str> {
        self.identities.get(&kind).map(String::as_str)
    }

    /// Comment to post, ignoring blank ones.
    pub fn effective_comment(&self) -> Option<&Comment> {
        self.comment.as_ref().filter(|c| !c.is_blank())
    }

    /// Whether the record asks for any remote change.
    pub fn has_change(&self) -> bool {
        self.score.is_some() || self.effective_comment().is_some()
    }

    /// Sort key: lowercased name, or the resolved identity when anonymized.
    pub fn display_key(&self) -> (String, String) {
        let id = resolve(self).map(|r| r.value).unwrap_or_default();
        match &self.name {
            Some(name) => (name.to_lowercase(), id),
            None => (id, String::new()),
        }
    }

    /// Human label for reports, e.g. `#3 (Ada Lovelace)`.
    pub fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) => format!("#{} ({name})", index + 1),
            None => format!("#{}", index + 1),
        }
    }
}
