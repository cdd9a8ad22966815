#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! TOML encoding of [`GradeDocument`]s.
//!
//! Field order inside a `[[submission]]` block is fixed: identity fields,
//! `name`, `score`, `comment`, `file`, `qN_points`, then any passthrough keys.

use std::path::Path;

use toml::Value;

use crate::{
    document::{Comment, GradeDocument, IdentityKind, SubmissionRecord},
    error::{Result, SyncError},
};

/// Renders a document as TOML text.
pub fn serialize(doc: &GradeDocument) -> Result<String> {
    let mut out = String::new();
    out.push_str(&format!("assignment_id = {}\n", doc.assignment_id));
    if let Some(quiz_id) = doc.quiz_id {
        out.push_str(&format!("quiz_id = {quiz_id}\n"));
    }

    // Plain values must precede any table header in TOML.
    let mut tables = toml::Table::new();
    for (key, value) in &doc.metadata {
        if is_table_like(value) {
            tables.insert(key.clone(), value.clone());
        } else {
            push_entry(&mut out, key, value);
        }
    }
    if !tables.is_empty() {
        let rendered = toml::to_string(&tables)
            .map_err(|e| SyncError::schema(format!("metadata cannot be written: {e}")))?;
        out.push('\n');
        out.push_str(&rendered);
    }

    for record in &doc.submissions {
        out.push('\n');
        out.push_str("[[submission]]\n");
        write_record(&mut out, record);
    }

    Ok(out)
}

/// Parses TOML text into a structurally valid document.
pub fn parse(text: &str) -> Result<GradeDocument> {
    let table: toml::Table = toml::from_str(text)?;

    let mut doc = GradeDocument::default();
    let mut assignment_id = None;
    let mut submissions = None;

    for (key, value) in table {
        match key.as_str() {
            "assignment_id" => assignment_id = Some(positive_integer(&key, &value)?),
            "quiz_id" => doc.quiz_id = Some(positive_integer(&key, &value)?),
            "submission" => submissions = Some(parse_submissions(value)?),
            _ => {
                doc.metadata.insert(key, value);
            }
        }
    }

    doc.assignment_id =
        assignment_id.ok_or_else(|| SyncError::schema("assignment_id is required"))?;
    doc.submissions =
        submissions.ok_or_else(|| SyncError::schema("document has no [[submission]] entries"))?;
    doc.validate_structure()?;
    Ok(doc)
}

/// Reads and parses a document from disk.
pub fn read(path: &Path) -> Result<GradeDocument> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SyncError::io(format!("could not read {}", path.display()), e))?;
    parse(&text)
}

/// Validates, serializes and writes a document to disk.
pub fn write(path: &Path, doc: &GradeDocument) -> Result<()> {
    doc.validate()?;
    let text = serialize(doc)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| SyncError::io(format!("could not create {}", parent.display()), e))?;
    }
    std::fs::write(path, text)
        .map_err(|e| SyncError::io(format!("could not write {}", path.display()), e))
}

/// Formats a score without redundant precision (`7`, `9.5`).
///
/// Integral values beyond the exactly representable range stay TOML floats
/// so they never overflow the integer grammar on the way back in.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        Value::Float(value).to_string()
    }
}

/// Appends the body of one `[[submission]]` block.
fn write_record(out: &mut String, record: &SubmissionRecord) {
    for kind in IdentityKind::PRECEDENCE {
        if let Some(value) = record.identity(kind) {
            // Only canonical digits become integers: `007` or `+5` would not
            // read back as the same text.
            let rendered = match value.parse::<i64>() {
                Ok(n) if kind.is_canvas_id() && n.to_string() == value => Value::Integer(n),
                _ => Value::String(value.to_string()),
            };
            push_entry(out, kind.key(), &rendered);
        }
    }
    if let Some(name) = &record.name {
        push_entry(out, "name", &Value::String(name.clone()));
    }
    if let Some(score) = record.score {
        out.push_str(&format!("score = {}\n", format_number(score)));
    }
    if let Some(comment) = &record.comment {
        let text = match comment {
            Comment::Text(text) => text.clone(),
            Comment::Paragraphs(_) => comment.to_html(),
        };
        push_entry(out, "comment", &Value::String(text));
    }
    if let Some(file) = &record.file {
        push_entry(out, "file", &Value::String(file.clone()));
    }
    for (n, points) in &record.question_points {
        out.push_str(&format!("q{n}_points = {}\n", format_number(*points)));
    }
    for (key, value) in &record.extra {
        push_entry(out, key, value);
    }
}

/// Appends `key = value` using the `toml` crate's value rendering.
fn push_entry(out: &mut String, key: &str, value: &Value) {
    out.push_str(&format!("{} = {value}\n", render_key(key)));
}

/// Quotes keys that are not valid bare keys.
fn render_key(key: &str) -> String {
    let bare = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare { key.to_string() } else { Value::String(key.to_string()).to_string() }
}

/// Tables and arrays of tables have to be written after plain values.
fn is_table_like(value: &Value) -> bool {
    match value {
        Value::Table(_) => true,
        Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_table),
        _ => false,
    }
}

/// Reads a strictly positive integer field.
fn positive_integer(key: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Integer(n) if *n > 0 => Ok(*n),
        Value::Integer(n) => Err(SyncError::schema(format!("{key} must be positive, got {n}"))),
        other => Err(SyncError::schema(format!(
            "{key} must be an integer, got {}",
            other.type_str()
        ))),
    }
}

/// Reads the `[[submission]]` array.
fn parse_submissions(value: Value) -> Result<Vec<SubmissionRecord>> {
    let Value::Array(items) = value else {
        return Err(SyncError::schema("`submission` must be an array of tables"));
    };
    if items.is_empty() {
        return Err(SyncError::schema("document has no [[submission]] entries"));
    }
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Table(table) => parse_record(index, table),
            other => Err(SyncError::schema(format!(
                "submission #{} must be a table, got {}",
                index + 1,
                other.type_str()
            ))),
        })
        .collect()
}

/// Reads one `[[submission]]` table.
fn parse_record(index: usize, table: toml::Table) -> Result<SubmissionRecord> {
    let mut record = SubmissionRecord::new();
    let mut single = None;
    let mut many = None;
    let at = |key: &str| format!("`{key}` of submission #{}", index + 1);

    for (key, value) in table {
        if let Some(kind) = IdentityKind::from_key(&key) {
            let id = match value {
                Value::String(s) => s,
                Value::Integer(n) => n.to_string(),
                other => {
                    return Err(SyncError::schema(format!(
                        "{} must be a string or integer, got {}",
                        at(&key),
                        other.type_str()
                    )));
                }
            };
            record.identities.insert(kind, id);
            continue;
        }

        match key.as_str() {
            "name" => record.name = Some(string_field(&at(&key), value)?),
            "score" => record.score = Some(number_field(&at(&key), &value)?),
            "comment" => single = Some(string_field(&at(&key), value)?),
            "comments" => many = Some(string_list(&at(&key), value)?),
            "file" => record.file = Some(string_field(&at(&key), value)?),
            _ => match question_number(&key) {
                Some(n) => {
                    let points = number_field(&at(&key), &value)?;
                    record.question_points.insert(n, points);
                }
                None => {
                    record.extra.insert(key, value);
                }
            },
        }
    }

    record.comment = match (many, single) {
        (Some(entries), Some(_)) => {
            tracing::warn!(
                "submission #{} has both `comment` and `comments`; using `comments`",
                index + 1
            );
            Some(Comment::Paragraphs(entries))
        }
        (Some(entries), None) => Some(Comment::Paragraphs(entries)),
        (None, Some(text)) => Some(Comment::Text(text)),
        (None, None) => None,
    };
    Ok(record)
}

/// `q12_points` → `Some(12)`.
fn question_number(key: &str) -> Option<u32> {
    key.strip_prefix('q')?.strip_suffix("_points")?.parse().ok()
}

/// Reads a string field.
fn string_field(what: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(SyncError::schema(format!(
            "{what} must be a string, got {}",
            other.type_str()
        ))),
    }
}

/// Reads an integer or float field.
fn number_field(what: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Integer(n) => Ok(*n as f64),
        Value::Float(f) => Ok(*f),
        other => Err(SyncError::schema(format!(
            "{what} must be a number, got {}",
            other.type_str()
        ))),
    }
}

/// Reads an array of strings.
fn string_list(what: &str, value: Value) -> Result<Vec<String>> {
    let Value::Array(items) = value else {
        return Err(SyncError::schema(format!("{what} must be an array of strings")));
    };
    items
        .into_iter()
        .map(|item| string_field(what, item))
        .collect()
}
