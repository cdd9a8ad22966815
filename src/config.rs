#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    constants::{DEFAULT_HTTP_TIMEOUT_SECS, EXAMPLE_COURSE_INFO},
    error::{Result, SyncError},
};

/// Shape of `course_info.toml`. Every field may also come from the
/// environment, so all are optional here.
#[derive(Debug, Default, Deserialize)]
struct RawCourseConfig {
    /// Canvas instance, e.g. `https://school.instructure.com`.
    base_url:  Option<String>,
    /// Canvas course id; written as an integer or a string.
    course_id: Option<toml::Value>,
    /// API access token.
    token:     Option<String>,
}

/// Course context handed explicitly to the Canvas client.
#[derive(Clone)]
pub struct CourseConfig {
    /// Canvas instance without a trailing slash.
    base_url:  String,
    /// Canvas course id.
    course_id: String,
    /// API access token.
    token:     String,
    /// Per-request timeout.
    timeout:   Duration,
}

impl std::fmt::Debug for CourseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourseConfig")
            .field("base_url", &self.base_url)
            .field("course_id", &self.course_id)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CourseConfig {
    /// Builds a configuration from explicit values.
    pub fn new(
        base_url: impl Into<String>,
        course_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            base_url:  base_url.into().trim().trim_end_matches('/').to_string(),
            course_id: course_id.into().trim().to_string(),
            token:     token.into().trim().to_string(),
            timeout:   Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    /// Returns a copy with a different request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Loads `path` (if it exists) and applies `CANVAS_*` environment
    /// overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = if path.is_file() {
            Some(std::fs::read_to_string(path).map_err(|e| {
                SyncError::io(format!("could not read course config {}", path.display()), e)
            })?)
        } else {
            None
        };
        Self::from_sources(text.as_deref(), path, |key| std::env::var(key).ok()).inspect(|cfg| {
            tracing::debug!("Loaded course config: {cfg:?}");
        })
    }

    /// Merges file contents with values from `env`; environment wins.
    pub fn from_sources(
        file_text: Option<&str>,
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let raw: RawCourseConfig = match file_text {
            Some(text) => toml::from_str(text).map_err(|e| {
                SyncError::Config(format!("failed to load course config {}: {e}", path.display()))
            })?,
            None => RawCourseConfig::default(),
        };

        let non_empty = |v: String| Some(v.trim().to_string()).filter(|v| !v.is_empty());
        let base_url = env("CANVAS_BASE_URL").and_then(non_empty).or(raw.base_url);
        let course_id = env("CANVAS_COURSE_ID").and_then(non_empty).or(match raw.course_id {
            Some(toml::Value::Integer(n)) => Some(n.to_string()),
            Some(toml::Value::String(s)) => Some(s),
            _ => None,
        });
        let token = env("CANVAS_TOKEN").and_then(non_empty).or(raw.token);

        let (Some(base_url), Some(course_id), Some(token)) = (base_url, course_id, token) else {
            return Err(SyncError::Config(format!(
                "course configuration not found or incomplete.\nExpected a TOML file at: \
                 {}\nCreate it with keys: base_url, course_id, token. Example:\n{}",
                path.display(),
                EXAMPLE_COURSE_INFO
            )));
        };

        let timeout = env("CANVAS_HTTP_TIMEOUT_SECS")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS));

        Ok(Self::new(base_url, course_id, token).with_timeout(timeout))
    }

    /// Canvas instance URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Canvas course id.
    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    /// API token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
