//! Release publisher: one idempotent upsert per tag.

use launchpad_config::PublishSettings;
use launchpad_core::{
    Artifact, ArtifactSet, Error, Release, ReleaseHost, ReleaseMetadata, Result, Version,
};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::orchestrator::PlatformFailure;
use crate::timeout::bounded;

/// Publishes an artifact set as the release for its version tag.
///
/// Publishing the same tag twice is safe: the host upsert replaces or skips
/// assets by name, and concurrent publishes of one tag within this process
/// are serialised.
#[derive(Clone)]
pub struct ReleasePublisher {
    host: Arc<dyn ReleaseHost>,
    product: String,
    settings: PublishSettings,
    timeout: Duration,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ReleasePublisher {
    pub fn new(
        host: Arc<dyn ReleaseHost>,
        product: impl Into<String>,
        settings: PublishSettings,
        timeout: Duration,
    ) -> Self {
        Self {
            host,
            product: product.into(),
            settings,
            timeout,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn lock_for(&self, tag: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(tag.to_string()).or_default().clone()
    }

    /// Create or update the release for `tag` with every file in `set`.
    ///
    /// `missing` lists the platforms that failed; they are named in the
    /// release notes so a partial release is never silent.
    pub async fn publish(
        &self,
        version: &Version,
        set: &ArtifactSet,
        tag: &str,
        missing: &[PlatformFailure],
    ) -> Result<Release> {
        if set.is_empty() {
            return Err(Error::CollectionIncomplete {
                failed: missing.iter().map(|f| f.target.clone()).collect(),
            });
        }

        let lock = self.lock_for(tag).await;
        let _guard = lock.lock().await;

        // Bundles are published through their archive.
        let artifacts: Vec<Artifact> = set.iter().filter(|a| !a.path.is_dir()).cloned().collect();
        let metadata = ReleaseMetadata {
            name: format!("{} {}", self.product, version),
            body: release_notes(&self.product, version, set, missing),
            target_commitish: set.commit.clone(),
            make_latest: !self.settings.prerelease && !self.settings.draft,
            prerelease: self.settings.prerelease,
            draft: self.settings.draft,
        };

        let attempts = self.settings.attempts.max(1);
        for attempt in 1..=attempts {
            // Re-read state each attempt so a racing writer's release is updated, not duplicated.
            let releases = bounded("list releases", self.timeout, self.host.list_releases()).await?;
            let existing = releases.iter().find(|r| r.tag == tag);
            info!(
                tag = %tag,
                attempt,
                existing = existing.map(|r| r.id.as_str()),
                assets = artifacts.len(),
                "Publishing release"
            );

            match bounded(
                format!("publish {}", tag),
                self.timeout,
                self.host.upsert_release(tag, &metadata, &artifacts),
            )
            .await
            {
                Ok(release) => {
                    info!(tag = %tag, release_id = %release.id, assets = release.assets.len(), "Release published");
                    return Ok(release);
                }
                Err(Error::PublishConflict { .. }) if attempt < attempts => {
                    warn!(tag = %tag, attempt, "Publish conflict, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(Error::PublishConflict { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        Err(Error::PublishConflict {
            tag: tag.to_string(),
            attempts,
        })
    }
}

/// Markdown body for a release: one row per asset, then any missing platforms.
pub fn release_notes(
    product: &str,
    version: &Version,
    set: &ArtifactSet,
    missing: &[PlatformFailure],
) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "## {} {}", product, version);
    let _ = writeln!(body);
    let _ = writeln!(body, "Built from `{}`.", launchpad_core::artifact::short_commit(&set.commit));
    let _ = writeln!(body);
    let _ = writeln!(body, "| Asset | Platform | Type | SHA-256 |");
    let _ = writeln!(body, "|---|---|---|---|");
    for artifact in set.iter().filter(|a| !a.path.is_dir()) {
        let _ = writeln!(
            body,
            "| {} | {} | {} | `{}` |",
            artifact.name,
            artifact.key.target,
            artifact.media_type(),
            artifact.checksum
        );
    }

    if !missing.is_empty() {
        let _ = writeln!(body);
        let _ = writeln!(body, "### Missing platforms");
        let _ = writeln!(body);
        for failure in missing {
            let _ = writeln!(
                body,
                "- **{}**: {} failed ({})",
                failure.target, failure.step, failure.message
            );
        }
    }
    body
}
