//! # canvas2toml
//!
//! Round-trips Canvas grades and comments through flat, hand-editable TOML
//! grade documents: download a gradebook, grade offline, then upload safely
//! with a confirmation step and a backup of the remote state taken before
//! anything is changed.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Pre-upload snapshots of remote grades
pub mod backup;
/// Canvas API traits and the REST client
pub mod canvas;
/// TOML encoding of grade documents
pub mod codec;
/// Course configuration
pub mod config;
/// A module defining a bunch of constant values to be used throughout
pub mod constants;
/// The in-memory grade document model
pub mod document;
/// Building grade documents from Canvas data
pub mod download;
/// Error taxonomy
pub mod error;
/// Score histograms
pub mod hist;
/// Operator prompts
pub mod prompt;
/// The upload protocol
pub mod upload;

pub use document::{Comment, GradeDocument, IdentityKind, ResolvedIdentity, SubmissionRecord};
pub use error::{Result, SyncError};
