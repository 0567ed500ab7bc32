//! Error types for launchpad.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::platform::{MediaType, PipelineStep};

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "version gate rejected: declared version '{version}' equals published tag '{latest_tag}'; bump the version before releasing"
    )]
    GateRejected { version: String, latest_tag: String },

    #[error("build failed for {platform} at {step}: {message}")]
    BuildFailed {
        platform: String,
        step: PipelineStep,
        message: String,
    },

    #[error("signing failed for {platform} at {step}: {message}")]
    SignFailed {
        platform: String,
        step: PipelineStep,
        message: String,
    },

    #[error(
        "{platform}: {step} reported success but the {media_type} artifact is missing at {}",
        .path.display()
    )]
    MissingArtifact {
        platform: String,
        step: PipelineStep,
        media_type: MediaType,
        path: PathBuf,
    },

    #[error("{platform} is missing required artifact classes: {}", join_media(.missing))]
    IncompleteArtifacts {
        platform: String,
        missing: Vec<MediaType>,
    },

    #[error("collection incomplete: every platform failed ({})", .failed.join(", "))]
    CollectionIncomplete { failed: Vec<String> },

    #[error("publish conflict on tag '{tag}' after {attempts} attempt(s)")]
    PublishConflict { tag: String, attempts: u32 },

    #[error("prune failed for release {release_id}: {message}")]
    PruneItemFailed { release_id: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    #[error("external service error: {message}")]
    External { message: String, transient: bool },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a caller may reasonably retry the operation that produced this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout { .. } | Error::PublishConflict { .. } => true,
            Error::External { transient, .. } => *transient,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

fn join_media(missing: &[MediaType]) -> String {
    missing
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
