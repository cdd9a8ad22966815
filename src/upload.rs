#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! The upload protocol: confirm, back up, apply, report.

use std::{collections::HashMap, fmt, path::PathBuf};

use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Panel, Style, Width, object::Rows},
};
use typed_builder::TypedBuilder;

use crate::{
    backup::BackupManager,
    canvas::GradingApi,
    document::{GradeDocument, IdentityKind, ResolvedIdentity, SubmissionRecord, resolve},
    error::{Result, SyncError},
    prompt::Confirm,
};

/// States of a single upload invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Document validated and batch computed.
    Loaded,
    /// Operator agreed to proceed.
    Confirmed,
    /// Snapshot persisted.
    BackedUp,
    /// Remote calls in flight.
    Applying,
    /// Summary produced.
    Done,
    /// Stopped without (further) remote effect.
    Aborted,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadState::Loaded => "LOADED",
            UploadState::Confirmed => "CONFIRMED",
            UploadState::BackedUp => "BACKED_UP",
            UploadState::Applying => "APPLYING",
            UploadState::Done => "DONE",
            UploadState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// A record selected for upload together with its resolved identity.
#[derive(Debug, Clone)]
pub struct BatchEntry<'a> {
    /// Position in the document.
    pub index:    usize,
    /// Identity chosen from the document.
    pub identity: ResolvedIdentity,
    /// What remote calls are addressed to: the Canvas user id once looked
    /// up, otherwise `identity`.
    pub target:   ResolvedIdentity,
    /// The record itself.
    pub record:   &'a SubmissionRecord,
}

/// A record that wanted a change but could not be addressed.
#[derive(Debug, Clone, PartialEq)]
pub struct Unresolved {
    /// Report label, e.g. `#4 (Grace Hopper)`.
    pub label:  String,
    /// Why it was excluded.
    pub reason: String,
}

/// Result of the LOADED step.
#[derive(Debug, Clone)]
pub struct UploadPlan<'a> {
    /// Records that will be backed up and applied, in document order.
    pub batch:        Vec<BatchEntry<'a>>,
    /// Records with a change but no usable identity.
    pub unresolvable: Vec<Unresolved>,
    /// Records with nothing to change.
    pub skipped:      usize,
}

/// Validates `doc` and partitions its records.
pub fn plan(doc: &GradeDocument) -> Result<UploadPlan<'_>> {
    doc.validate_structure()?;

    let mut plan = UploadPlan {
        batch:        Vec::new(),
        unresolvable: Vec::new(),
        skipped:      0,
    };
    for (index, record) in doc.submissions.iter().enumerate() {
        if !record.has_change() {
            plan.skipped += 1;
            continue;
        }
        match resolve(record) {
            Ok(identity) => plan.batch.push(BatchEntry {
                index,
                target: identity.clone(),
                identity,
                record,
            }),
            Err(err) => {
                let label = record.label(index);
                tracing::warn!("Excluding submission {label}: {err}");
                plan.unresolvable.push(Unresolved {
                    label,
                    reason: err.to_string(),
                });
            }
        }
    }
    Ok(plan)
}

/// Outcome of one remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallStatus {
    /// Nothing to send.
    NotRequested,
    /// Accepted by the remote.
    Applied,
    /// Rejected; holds the [`SyncError::RemoteApply`] message.
    Failed(String),
}

impl CallStatus {
    /// Whether this call was attempted and failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, CallStatus::Failed(_))
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::NotRequested => f.write_str("-"),
            CallStatus::Applied => f.write_str("applied"),
            CallStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// How a record fared overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Every requested call succeeded.
    Applied,
    /// Some calls succeeded, some failed.
    Partial,
    /// Every requested call failed.
    Failed,
}

/// Per-record upload result.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordResult {
    /// Remote key the calls were addressed to.
    pub identity: ResolvedIdentity,
    /// Display name, when present in the document.
    pub name:     Option<String>,
    /// Score push.
    pub score:    CallStatus,
    /// Comment push.
    pub comment:  CallStatus,
}

impl RecordResult {
    /// Classifies the record.
    pub fn outcome(&self) -> RecordOutcome {
        let calls = [&self.score, &self.comment];
        let requested = calls
            .iter()
            .filter(|c| !matches!(c, CallStatus::NotRequested))
            .count();
        let failed = calls.iter().filter(|c| c.is_failed()).count();
        match failed {
            0 => RecordOutcome::Applied,
            n if n == requested => RecordOutcome::Failed,
            _ => RecordOutcome::Partial,
        }
    }
}

/// The DONE report.
#[derive(Debug, Clone, Default, TypedBuilder)]
#[builder(field_defaults(default))]
pub struct UploadSummary {
    /// Results in batch order.
    pub results:      Vec<RecordResult>,
    /// Records excluded for lack of identity.
    pub unresolvable: Vec<Unresolved>,
    /// Records with nothing to change.
    pub skipped:      usize,
    /// Snapshot written before applying, if any records were applied.
    #[builder(setter(strip_option))]
    pub backup:       Option<PathBuf>,
}

impl UploadSummary {
    /// Number of records with a given outcome.
    fn count(&self, outcome: RecordOutcome) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome() == outcome)
            .count()
    }

    /// Records fully applied.
    pub fn applied(&self) -> usize {
        self.count(RecordOutcome::Applied)
    }

    /// Records partially applied.
    pub fn partial(&self) -> usize {
        self.count(RecordOutcome::Partial)
    }

    /// Records where every call failed.
    pub fn failed(&self) -> usize {
        self.count(RecordOutcome::Failed)
    }

    /// One-line totals.
    pub fn totals(&self) -> String {
        format!(
            "{} applied, {} partial, {} failed, {} unresolvable, {} skipped",
            self.applied(),
            self.partial(),
            self.failed(),
            self.unresolvable.len(),
            self.skipped
        )
    }

    /// Renders the summary as a table.
    pub fn render(&self) -> String {
        let mut rows: Vec<SummaryRow> = self.results.iter().map(SummaryRow::from).collect();
        rows.extend(self.unresolvable.iter().map(|u| SummaryRow {
            identity: "-".into(),
            name:     u.label.clone(),
            score:    "-".into(),
            comment:  "-".into(),
            outcome:  "unresolvable".into(),
        }));

        Table::new(&rows)
            .with(Panel::header("Upload Summary"))
            .with(Panel::footer(self.totals()))
            .with(Modify::new(Rows::new(1..)).with(Width::wrap(32).keep_words(true)))
            .with(
                Modify::new(Rows::first())
                    .with(Alignment::center())
                    .with(Alignment::center_vertical()),
            )
            .with(
                Modify::new(Rows::last())
                    .with(Alignment::center())
                    .with(Alignment::center_vertical()),
            )
            .with(Style::modern())
            .to_string()
    }
}

/// Table row for [`UploadSummary::render`].
#[derive(Tabled)]
struct SummaryRow {
    /// Remote key.
    #[tabled(rename = "Identity")]
    identity: String,
    /// Student name.
    #[tabled(rename = "Name")]
    name:     String,
    /// Score call status.
    #[tabled(rename = "Score")]
    score:    String,
    /// Comment call status.
    #[tabled(rename = "Comment")]
    comment:  String,
    /// Overall outcome.
    #[tabled(rename = "Result")]
    outcome:  String,
}

impl From<&RecordResult> for SummaryRow {
    fn from(result: &RecordResult) -> Self {
        let outcome = match result.outcome() {
            RecordOutcome::Applied => "applied",
            RecordOutcome::Partial => "partial",
            RecordOutcome::Failed => "failed",
        };
        Self {
            identity: result.identity.to_string(),
            name:     result.name.clone().unwrap_or_default(),
            score:    result.score.to_string(),
            comment:  result.comment.to_string(),
            outcome:  outcome.into(),
        }
    }
}

/// Why an upload stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The operator declined at the confirmation step.
    Declined,
}

/// What [`Reconciler::run`] ended with.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// The batch was processed; see the summary for per-record results.
    Done(UploadSummary),
    /// Stopped before any remote mutation.
    Aborted {
        /// State the run was in when it stopped.
        at:     UploadState,
        /// Why.
        reason: AbortReason,
    },
}

/// Drives one upload from a parsed document to a summary.
///
/// Validation and backup failures surface as `Err` (the run is aborted
/// before any remote write); a declined confirmation is an ordinary
/// [`UploadOutcome::Aborted`].
#[derive(TypedBuilder)]
pub struct Reconciler<'a, A, C> {
    /// Remote grading surface.
    api:     &'a A,
    /// Confirmation strategy, invoked once per run.
    confirm: C,
    /// Where snapshots go.
    backups: BackupManager,
}

impl<A: GradingApi, C: Confirm> Reconciler<'_, A, C> {
    /// Runs LOADED → CONFIRMED → BACKED_UP → APPLYING → DONE.
    pub async fn run(mut self, doc: &GradeDocument) -> Result<UploadOutcome> {
        let mut plan = match plan(doc) {
            Ok(plan) => plan,
            Err(err) => {
                tracing::error!("{} → {}: {err}", UploadState::Loaded, UploadState::Aborted);
                return Err(err);
            }
        };
        tracing::info!(
            "{}: {} to upload, {} unresolvable, {} without changes",
            UploadState::Loaded,
            plan.batch.len(),
            plan.unresolvable.len(),
            plan.skipped
        );

        if plan.batch.is_empty() {
            tracing::info!("Nothing to upload");
            return Ok(UploadOutcome::Done(
                UploadSummary::builder()
                    .unresolvable(plan.unresolvable)
                    .skipped(plan.skipped)
                    .build(),
            ));
        }

        if !self.confirm.confirm(plan.batch.len()) {
            tracing::info!("{} → {}: declined", UploadState::Confirmed, UploadState::Aborted);
            return Ok(UploadOutcome::Aborted {
                at:     UploadState::Confirmed,
                reason: AbortReason::Declined,
            });
        }
        tracing::info!("{}", UploadState::Confirmed);

        self.resolve_targets(&mut plan.batch).await;

        let snapshot = match self.backups.capture(self.api, doc, &plan.batch).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::error!("{} → {}: {err}", UploadState::Confirmed, UploadState::Aborted);
                return Err(err);
            }
        };
        tracing::info!("{}: {}", UploadState::BackedUp, snapshot.path.display());

        tracing::info!("{}", UploadState::Applying);
        let total = plan.batch.len();
        let mut results = Vec::with_capacity(total);
        // The snapshot holds one entry per batch record, in batch order.
        for (n, (entry, current)) in plan.batch.iter().zip(&snapshot.current).enumerate() {
            let result = self.apply(doc.assignment_id, entry, current.attempt).await;
            tracing::info!("[{}/{total}] {} {:?}", n + 1, entry.identity, result.outcome());
            results.push(result);
        }

        let summary = UploadSummary::builder()
            .results(results)
            .unresolvable(plan.unresolvable)
            .skipped(plan.skipped)
            .backup(snapshot.path)
            .build();
        tracing::info!("{}: {}", UploadState::Done, summary.totals());
        Ok(UploadOutcome::Done(summary))
    }

    /// Looks up Canvas user ids for SIS-keyed entries, once per identity.
    ///
    /// A failed or empty lookup leaves the entry addressed by its SIS key.
    async fn resolve_targets(&self, batch: &mut [BatchEntry<'_>]) {
        let mut cache: HashMap<ResolvedIdentity, ResolvedIdentity> = HashMap::new();
        for entry in batch.iter_mut().filter(|e| !e.identity.kind.is_canvas_id()) {
            if let Some(target) = cache.get(&entry.identity) {
                entry.target = target.clone();
                continue;
            }
            let target = match self.api.resolve_user(&entry.identity).await {
                Ok(Some(id)) => ResolvedIdentity::new(IdentityKind::UserId, id.to_string()),
                Ok(None) => entry.identity.clone(),
                Err(err) => {
                    tracing::warn!("Could not look up {}: {err}", entry.identity);
                    entry.identity.clone()
                }
            };
            tracing::debug!("{} → {}", entry.identity, target.remote_key());
            cache.insert(entry.identity.clone(), target.clone());
            entry.target = target;
        }
    }

    /// Sends the score and comment of one record; each call stands alone.
    async fn apply(
        &self,
        assignment_id: i64,
        entry: &BatchEntry<'_>,
        attempt: Option<i64>,
    ) -> RecordResult {
        let target = entry.target.remote_key();

        let score = match entry.record.score {
            None => CallStatus::NotRequested,
            Some(score) => match self
                .api
                .post_grade(assignment_id, &entry.target, score)
                .await
            {
                Ok(()) => CallStatus::Applied,
                Err(err) => rejected("score", &target, err),
            },
        };

        let comment = match entry.record.effective_comment() {
            None => CallStatus::NotRequested,
            Some(comment) => match self
                .api
                .post_comment(assignment_id, &entry.target, &comment.to_html(), attempt)
                .await
            {
                Ok(()) => CallStatus::Applied,
                Err(err) => rejected("comment", &target, err),
            },
        };

        RecordResult {
            identity: entry.identity.clone(),
            name: entry.record.name.clone(),
            score,
            comment,
        }
    }
}

/// Records a failed call as a [`SyncError::RemoteApply`].
fn rejected(what: &'static str, target: &str, err: SyncError) -> CallStatus {
    let err = SyncError::RemoteApply {
        what,
        target: target.to_string(),
        reason: err.to_string(),
    };
    tracing::warn!("{err}");
    CallStatus::Failed(err.to_string())
}
