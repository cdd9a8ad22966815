#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Builds grade documents from Canvas data: assignment submissions and quiz
//! Student Analysis reports.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use toml::Value;

use crate::{
    canvas::{Candidate, CourseApi, RemoteSubmission},
    document::{Comment, GradeDocument, IdentityKind, SubmissionRecord},
    error::{Result, SyncError},
};

/// Replaces every run of characters outside `[A-Za-z0-9._-]` with `_`.
pub fn safe_filename(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut in_run = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            slug.push(c);
            in_run = false;
        } else if !in_run {
            slug.push('_');
            in_run = true;
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() { "unnamed".into() } else { slug.to_string() }
}

/// `<id>_<slug>.toml`
pub fn assignment_output_path(candidate: &Candidate) -> PathBuf {
    PathBuf::from(format!(
        "{}_{}.toml",
        candidate.id,
        safe_filename(candidate.title.as_deref().unwrap_or("assignment"))
    ))
}

/// `<id>_<slug>_responses.toml`
pub fn quiz_output_path(candidate: &Candidate) -> PathBuf {
    PathBuf::from(format!(
        "{}_{}_responses.toml",
        candidate.id,
        safe_filename(candidate.title.as_deref().unwrap_or("quiz"))
    ))
}

/// `<stem>_submissions` next to the output document.
pub fn submissions_dir(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "grades".into());
    output.with_file_name(format!("{stem}_submissions"))
}

/// Converts one Canvas submission into a record.
///
/// The latest remote comment becomes the record's comment; `anon` drops the
/// student name.
pub fn record_from_remote(
    sub: &RemoteSubmission,
    anon: bool,
    file: Option<String>,
) -> SubmissionRecord {
    let mut record = SubmissionRecord::new();
    if let Some(id) = sub.canvas_user_id() {
        record = record.with_identity(IdentityKind::Id, id.to_string());
    }
    if let Some(user) = &sub.user {
        let non_blank = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        if let Some(sis) = non_blank(&user.sis_user_id) {
            record = record.with_identity(IdentityKind::SisId, sis);
        }
        if let Some(login) = non_blank(&user.login_id) {
            record = record.with_identity(IdentityKind::SisLoginId, login);
        }
    }
    if let Some(name) = sub.student_name().filter(|_| !anon) {
        record = record.with_name(name);
    }
    record.score = sub.current_score();
    record.comment = sub
        .latest_comment()
        .map(|text| Comment::Paragraphs(vec![text.to_string()]));
    record.file = file;
    record
}

/// Assembles an assignment document. `files` maps Canvas user ids to
/// downloaded attachment paths relative to the document.
pub fn assignment_document(
    candidate: &Candidate,
    submissions: &[RemoteSubmission],
    files: &HashMap<i64, String>,
    anon: bool,
) -> GradeDocument {
    let mut doc = GradeDocument::new(candidate.id);
    doc.metadata.insert(
        "grading_info".into(),
        Value::String(crate::constants::GRADING_INFO_BODY.into()),
    );
    let strings = [
        ("title", &candidate.title),
        ("html_url", &candidate.html_url),
        ("due_at", &candidate.due_at),
    ];
    for (key, value) in strings {
        if let Some(value) = value {
            doc.metadata.insert(key.into(), Value::String(value.clone()));
        }
    }
    if let Some(points) = candidate.points_possible {
        doc.metadata.insert("points_possible".into(), number_value(points));
    }

    doc.submissions = submissions
        .iter()
        .map(|sub| {
            let file = sub.canvas_user_id().and_then(|id| files.get(&id).cloned());
            record_from_remote(sub, anon, file)
        })
        .collect();
    doc.sort_submissions();
    doc
}

/// Downloads the first PDF attachment of each submission into `dir`.
///
/// Returns user id → path relative to `dir`'s parent. Individual failures
/// are logged and skipped.
pub async fn download_attachments<A: CourseApi>(
    api: &A,
    submissions: &[RemoteSubmission],
    title: &str,
    dir: &Path,
) -> Result<HashMap<i64, String>> {
    let mut files = HashMap::new();
    let dir_name = dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let assignment_part = safe_filename(title);

    for sub in submissions {
        let Some(user_id) = sub.canvas_user_id() else {
            continue;
        };
        let Some(attachment) = sub.attachments.iter().find(|a| a.is_pdf() && a.url.is_some())
        else {
            continue;
        };

        let file_name = format!("{assignment_part}_{}.pdf", safe_filename(&user_id.to_string()));
        let dest = dir.join(&file_name);
        let bytes = match api.fetch_attachment(attachment).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(
                    "Failed to download {}: {err}",
                    attachment.file_name().unwrap_or("attachment")
                );
                continue;
            }
        };
        std::fs::create_dir_all(dir)
            .map_err(|e| SyncError::io(format!("could not create {}", dir.display()), e))?;
        std::fs::write(&dest, bytes)
            .map_err(|e| SyncError::io(format!("could not write {}", dest.display()), e))?;
        tracing::debug!("Saved {}", dest.display());
        files.insert(user_id, format!("{dir_name}/{file_name}"));
    }

    Ok(files)
}

/// One student's row of a Student Analysis report.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizResponse {
    /// Student name.
    pub name:    String,
    /// Canvas user id.
    pub id:      String,
    /// SIS user id.
    pub sis_id:  String,
    /// Answer text per question.
    pub answers: Vec<String>,
    /// Points per question.
    pub points:  Vec<f64>,
}

/// A parsed Student Analysis report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuizReport {
    /// Question prompts, in column order.
    pub prompts:     Vec<String>,
    /// Maximum points per question, taken from the header after each prompt.
    pub max_points:  Vec<f64>,
    /// Student rows.
    pub responses:   Vec<QuizResponse>,
    /// Whether question `i` has any nonzero points at all.
    pub graded:      Vec<bool>,
}

/// Parses a Student Analysis CSV.
///
/// Question columns are headed `N: prompt`; the following column carries
/// the points, with its header holding the question's maximum.
pub fn parse_quiz_report(bytes: &[u8]) -> Result<QuizReport> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| SyncError::Api(format!("quiz report is not valid CSV: {e}")))?
        .clone();

    let column = |name: &str| headers.iter().position(|h| h == name);
    let (Some(name_col), Some(id_col)) = (column("name"), column("id")) else {
        return Err(SyncError::Api("quiz report is missing the name or id column".into()));
    };
    let sis_col = column("sis_id");

    let mut report = QuizReport::default();
    let mut question_cols = Vec::new();
    for (i, header) in headers.iter().enumerate() {
        if let Some(prompt) = question_prompt(header) {
            question_cols.push(i);
            report.prompts.push(prompt.to_string());
            report
                .max_points
                .push(headers.get(i + 1).map(lenient_number).unwrap_or(0.0));
        }
    }

    let cell = |row: &csv::StringRecord, i: usize| row.get(i).unwrap_or_default().to_string();
    for row in reader.records() {
        let row = row.map_err(|e| SyncError::Api(format!("bad quiz report row: {e}")))?;
        report.responses.push(QuizResponse {
            name:    cell(&row, name_col),
            id:      cell(&row, id_col),
            sis_id:  sis_col.map(|c| cell(&row, c)).unwrap_or_default(),
            answers: question_cols.iter().map(|&q| cell(&row, q)).collect(),
            points:  question_cols
                .iter()
                .map(|&q| row.get(q + 1).map(lenient_number).unwrap_or(0.0))
                .collect(),
        });
    }

    report.graded = (0..question_cols.len())
        .map(|q| report.responses.iter().any(|r| r.points[q] != 0.0))
        .collect();
    Ok(report)
}

/// `"3: What is 2+2?"` → `Some("What is 2+2?")`.
fn question_prompt(header: &str) -> Option<&str> {
    let (number, rest) = header.split_once(':')?;
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let prompt = rest.trim_start();
    (prompt.len() < rest.len()).then_some(prompt)
}

/// Parses a number, treating anything unparseable as zero.
fn lenient_number(text: &str) -> f64 {
    text.trim().parse().unwrap_or(0.0)
}

/// Integral values as TOML integers, the rest as floats.
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Value::Integer(value as i64)
    } else {
        Value::Float(value)
    }
}

/// "First Last" → "Last, First", used for ordering quiz rows.
fn last_first(name: &str) -> String {
    match name.split_once(' ') {
        Some((first, rest)) => format!("{rest}, {first}").to_lowercase(),
        None => name.to_lowercase(),
    }
}

/// Canvas stores quiz descriptions as HTML; documents carry them as Markdown.
fn description_markdown(html: &str) -> String {
    match htmd::HtmlToMarkdown::builder().build().convert(html) {
        Ok(markdown) => markdown.trim().to_string(),
        Err(err) => {
            tracing::warn!("Keeping quiz description as HTML: {err}");
            html.trim().to_string()
        }
    }
}

/// Assembles a quiz responses document.
pub fn quiz_document(quiz: &Candidate, report: &QuizReport) -> GradeDocument {
    let mut doc = GradeDocument::new(quiz.assignment_id.unwrap_or(quiz.id));
    doc.quiz_id = Some(quiz.id);
    if let Some(title) = &quiz.title {
        doc.metadata.insert("title".into(), Value::String(title.clone()));
    }
    if let Some(description) = quiz.description.as_deref().filter(|d| !d.trim().is_empty()) {
        doc.metadata
            .insert("description".into(), Value::String(description_markdown(description)));
    }
    for (q, prompt) in report.prompts.iter().enumerate() {
        let n = q + 1;
        doc.metadata
            .insert(format!("q{n}_prompt"), Value::String(prompt.clone()));
        doc.metadata
            .insert(format!("q{n}_max_points"), number_value(report.max_points[q]));
    }

    let mut rows: Vec<&QuizResponse> = report.responses.iter().collect();
    rows.sort_by_cached_key(|r| last_first(&r.name));

    doc.submissions = rows
        .into_iter()
        .map(|row| {
            let mut record = SubmissionRecord::new();
            if !row.id.trim().is_empty() {
                record = record.with_identity(IdentityKind::Id, row.id.trim());
            }
            if !row.sis_id.trim().is_empty() {
                record = record.with_identity(IdentityKind::SisId, row.sis_id.trim());
            }
            if !row.name.is_empty() {
                record = record.with_name(row.name.clone());
            }
            for (q, answer) in row.answers.iter().enumerate() {
                let n = q + 1;
                record
                    .extra
                    .insert(format!("q{n}_answer"), Value::String(answer.clone()));
                if report.graded[q] {
                    record.question_points.insert(n as u32, row.points[q]);
                }
            }
            record
        })
        .collect();
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_collapse_runs() {
        assert_eq!(safe_filename("HW 3: Vectors & Fields"), "HW_3_Vectors_Fields");
        assert_eq!(safe_filename("  ??  "), "unnamed");
        assert_eq!(safe_filename("lab-1.v2"), "lab-1.v2");
    }

    #[test]
    fn question_headers() {
        assert_eq!(question_prompt("12: Why?"), Some("Why?"));
        assert_eq!(question_prompt("12:Why?"), None);
        assert_eq!(question_prompt("section: A"), None);
    }

    #[test]
    fn quiz_descriptions_become_markdown() {
        let markdown = description_markdown("<p>Read <strong>all</strong> questions.</p>");
        assert!(markdown.contains("**all**"), "{markdown}");
        assert!(!markdown.contains("<p>"), "{markdown}");
    }

    #[test]
    fn names_sort_by_last_name() {
        assert_eq!(last_first("Ada Lovelace"), "lovelace, ada");
        assert_eq!(last_first("Plato"), "plato");
    }
}
