//! Releases and the release-host trait.
//!
//! A release host (GitHub Releases, an in-memory fake, ...) stores published
//! releases, their attached assets and the tags they point at.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::{Error, Result};

/// A file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    /// Host-specific asset identifier.
    pub id: String,
    pub name: String,
    /// Carries the artifact key id so re-runs are recognisable.
    pub label: Option<String>,
    pub size: u64,
    /// Hex SHA-256, when the host reports one.
    pub checksum: Option<String>,
}

/// The published bundle of artifacts for one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Host-specific release identifier.
    pub id: String,
    pub tag: String,
    pub name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assets: Vec<ReleaseAsset>,
    pub latest: bool,
}

impl Release {
    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

/// Metadata sent with an upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    pub name: String,
    pub body: String,
    /// Commit the tag should point at when the host creates it.
    pub target_commitish: String,
    /// Move the "latest" flag to this release as part of the upsert.
    pub make_latest: bool,
    pub prerelease: bool,
    pub draft: bool,
}

/// How many releases to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub keep_count: usize,
    /// Report what would be deleted without deleting.
    pub dry_run: bool,
}

impl RetentionPolicy {
    pub fn keep_last(keep_count: usize) -> Result<Self> {
        if keep_count < 1 {
            return Err(Error::InvalidInput(
                "retention keep count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            keep_count,
            dry_run: false,
        })
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_count: 10,
            dry_run: false,
        }
    }
}

/// Trait for release hosts.
#[async_trait]
pub trait ReleaseHost: Send + Sync {
    /// Name of this host.
    fn name(&self) -> &'static str;

    /// All published releases.
    async fn list_releases(&self) -> Result<Vec<Release>>;

    /// Create the release for `tag`, or update it if it exists.
    ///
    /// Assets whose name matches an attached asset replace it; an identical
    /// asset (same name and checksum) is left untouched. Fails with
    /// [`Error::PublishConflict`] when another writer raced this one.
    async fn upsert_release(
        &self,
        tag: &str,
        metadata: &ReleaseMetadata,
        artifacts: &[Artifact],
    ) -> Result<Release>;

    /// Delete a release. [`Error::NotFound`] when it does not exist.
    async fn delete_release(&self, id: &str) -> Result<()>;

    /// Delete a tag reference. [`Error::NotFound`] when it does not exist.
    async fn delete_tag(&self, name: &str) -> Result<()>;
}

/// Tag of the most recent published release.
///
/// Prefers the release flagged latest; otherwise the newest by creation time.
pub fn latest_tag(releases: &[Release]) -> Option<&str> {
    releases
        .iter()
        .find(|r| r.latest)
        .or_else(|| releases.iter().max_by_key(|r| r.created_at))
        .map(|r| r.tag.as_str())
}
