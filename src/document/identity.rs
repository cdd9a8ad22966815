#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt;

use super::SubmissionRecord;
use crate::error::{Result, SyncError};

/// The four student-identifying fields a submission may carry.
///
/// Variant order is resolution precedence: SIS ids win over Canvas ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdentityKind {
    /// Institution SIS user id (`sis_id`).
    SisId,
    /// Institution SIS login (`sis_login_id`).
    SisLoginId,
    /// Canvas user id (`user_id`).
    UserId,
    /// Canvas id as exported by the download path (`id`).
    Id,
}

impl IdentityKind {
    /// All kinds, highest precedence first.
    pub const PRECEDENCE: [IdentityKind; 4] = [
        IdentityKind::SisId,
        IdentityKind::SisLoginId,
        IdentityKind::UserId,
        IdentityKind::Id,
    ];

    /// Field name used in grade documents.
    pub fn key(self) -> &'static str {
        match self {
            IdentityKind::SisId => "sis_id",
            IdentityKind::SisLoginId => "sis_login_id",
            IdentityKind::UserId => "user_id",
            IdentityKind::Id => "id",
        }
    }

    /// Maps a document field name back to its kind.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::PRECEDENCE.into_iter().find(|kind| kind.key() == key)
    }

    /// Whether values of this kind are raw Canvas ids rather than SIS keys.
    pub fn is_canvas_id(self) -> bool {
        matches!(self, IdentityKind::UserId | IdentityKind::Id)
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The identity chosen to address a submission on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedIdentity {
    /// Which field matched.
    pub kind:  IdentityKind,
    /// Trimmed field value.
    pub value: String,
}

impl ResolvedIdentity {
    /// Creates a resolved identity directly, trimming the value.
    pub fn new(kind: IdentityKind, value: impl AsRef<str>) -> Self {
        Self {
            kind,
            value: value.as_ref().trim().to_string(),
        }
    }

    /// Key understood by the Canvas submissions endpoints.
    ///
    /// SIS-keyed lookups use Canvas' `sis_user_id:` / `sis_login_id:` prefix
    /// syntax; Canvas ids are used verbatim.
    pub fn remote_key(&self) -> String {
        match self.kind {
            IdentityKind::SisId => format!("sis_user_id:{}", self.value),
            IdentityKind::SisLoginId => format!("sis_login_id:{}", self.value),
            IdentityKind::UserId | IdentityKind::Id => self.value.clone(),
        }
    }
}

impl fmt::Display for ResolvedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind, self.value)
    }
}

/// Picks the remote-addressable key for a submission.
///
/// Returns the first present, non-blank field in [`IdentityKind::PRECEDENCE`]
/// order, or [`SyncError::UnresolvableIdentity`] when there is none.
pub fn resolve(record: &SubmissionRecord) -> Result<ResolvedIdentity> {
    IdentityKind::PRECEDENCE
        .into_iter()
        .find_map(|kind| {
            record
                .identity(kind)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| ResolvedIdentity::new(kind, value))
        })
        .ok_or_else(|| SyncError::UnresolvableIdentity {
            label: record.name.clone().unwrap_or_else(|| "<unnamed>".into()),
        })
}
