#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::PathBuf;

/// Convenience alias used throughout the library.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Everything that can go wrong while moving grades between Canvas and a
/// grade document.
///
/// Document-level variants (`Parse`, `Schema`, `BackupFailed`) abort a whole
/// run. Record-level variants (`UnresolvableIdentity`, `RemoteApply`) are
/// collected into the upload summary instead of being propagated.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// The document text is not valid TOML.
    #[error("could not parse grade document: {0}")]
    Parse(String),
    /// The document is valid TOML but does not describe a usable grade
    /// document.
    #[error("invalid grade document: {0}")]
    Schema(String),
    /// A submission carries none of `sis_id`, `sis_login_id`, `user_id`, `id`.
    #[error("submission {label} has no sis_id, sis_login_id, user_id or id")]
    UnresolvableIdentity {
        /// Position (1-based) and name of the offending record, for reporting.
        label: String,
    },
    /// The pre-upload snapshot could not be captured or persisted.
    #[error("backup to {} failed: {reason}", path.display())]
    BackupFailed {
        /// Destination the snapshot was meant to be written to.
        path:   PathBuf,
        /// What went wrong.
        reason: String,
    },
    /// A single score or comment push was rejected.
    #[error("{what} for {target} was rejected: {reason}")]
    RemoteApply {
        /// Either `score` or `comment`.
        what:   &'static str,
        /// Remote key the call was addressed to.
        target: String,
        /// Message returned by the remote or transport.
        reason: String,
    },
    /// Transport or HTTP-level failure talking to Canvas.
    #[error("Canvas request failed: {0}")]
    Api(String),
    /// Course configuration is missing or incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Local file system failure outside the backup path.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying I/O error.
        #[source]
        source:  std::io::Error,
    },
}

impl SyncError {
    /// Builds a [`SyncError::Schema`] from anything displayable.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Wraps an I/O error with a short description of the failed action.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::Api(err.to_string())
    }
}
