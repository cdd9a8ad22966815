#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Default course configuration file.
pub const DEFAULT_COURSE_FILE: &str = "course_info.toml";

/// Default per-request timeout for Canvas calls, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Page size requested from paginated Canvas collections.
pub const PAGE_SIZE: &str = "100";

/// Seconds between polls while Canvas generates a quiz report.
pub const QUIZ_REPORT_POLL_SECS: u64 = 2;

/// Give up waiting for a quiz report after this many seconds.
pub const QUIZ_REPORT_TIMEOUT_SECS: u64 = 120;

/// `chrono` format for the timestamp in backup file names.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H-%M-%S";

/// Width, in characters, of the longest histogram bar.
pub const HISTOGRAM_WIDTH: usize = 40;

/// Shown when `course_info.toml` is missing or incomplete.
pub const EXAMPLE_COURSE_INFO: &str = r#"base_url = "https://school.instructure.com"
course_id = 12345
token = "YOUR_API_TOKEN""#;

/// Instructions embedded as `grading_info` in downloaded assignment files.
pub const GRADING_INFO_BODY: &str = r#"This file is used to auto-upload grades and comments to the Canvas LMS.

You should not edit anything apart from the `score` and `comment` fields **inside** each `[[submission]]` block.

Comments support **Markdown** formatting, so you can include things like:

  - Emphasis: *italic* and **bold**
  - Lists
    1. Including numbered lists
    2. And sub-lists
  - Code blocks
  - Unicode characters, e.g., ∇·E = ρ/ε₀ (not LaTeX!)

Use `comments = ["...", "..."]` instead of `comment` to post several
paragraphs. Remove `score` to leave the Canvas score untouched, and remove
any `comment` you do not want posted again.

The suggested format for grading homeworks is a per question score and
optional comment(s).  For example:

----

**Problem 1**: 2/3 points

  - Minor mistake in calculation.

**Problem 2**: 5/5 points

**Problem 3**: 0/2 points
----
"#;
