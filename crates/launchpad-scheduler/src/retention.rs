//! Retention: keep the newest N releases, delete the rest with their tags.

use launchpad_core::{Error, Release, ReleaseHost, Result, RetentionPolicy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::timeout::bounded;

/// What happened to one release or tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "kebab-case")]
pub enum ItemStatus {
    Deleted,
    /// It was already gone, which counts as success.
    AlreadyGone,
    Failed(String),
    /// Dry run: would have been deleted.
    Planned,
}

impl ItemStatus {
    fn is_failure(&self) -> bool {
        matches!(self, ItemStatus::Failed(_))
    }

    fn is_removed(&self) -> bool {
        matches!(self, ItemStatus::Deleted | ItemStatus::AlreadyGone)
    }
}

/// One release selected for pruning.
#[derive(Debug, Clone, Serialize)]
pub struct PruneItem {
    pub release_id: String,
    pub tag: String,
    pub created_at: DateTime<Utc>,
    pub release: ItemStatus,
    pub tag_status: ItemStatus,
}

/// Outcome of one prune pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    /// Tags kept, newest first.
    pub kept: Vec<String>,
    pub items: Vec<PruneItem>,
    pub dry_run: bool,
}

impl PruneReport {
    /// Per-item failures as errors, for reporting. An item whose release and
    /// tag both failed contributes two.
    pub fn failures(&self) -> Vec<Error> {
        let mut failures = Vec::new();
        for item in &self.items {
            if let ItemStatus::Failed(message) = &item.release {
                failures.push(Error::PruneItemFailed {
                    release_id: item.release_id.clone(),
                    message: message.clone(),
                });
            }
            if let ItemStatus::Failed(message) = &item.tag_status {
                failures.push(Error::PruneItemFailed {
                    release_id: item.release_id.clone(),
                    message: format!("tag {}: {}", item.tag, message),
                });
            }
        }
        failures
    }

    /// Releases actually removed.
    pub fn deleted(&self) -> usize {
        self.items.iter().filter(|i| i.release.is_removed()).count()
    }
}

/// Deletes releases beyond the configured keep count.
#[derive(Clone)]
pub struct RetentionManager {
    host: Arc<dyn ReleaseHost>,
    timeout: Duration,
}

impl RetentionManager {
    pub fn new(host: Arc<dyn ReleaseHost>, timeout: Duration) -> Self {
        Self { host, timeout }
    }

    /// List the host's releases and prune them.
    pub async fn run(&self, policy: &RetentionPolicy) -> Result<PruneReport> {
        let releases = bounded("list releases", self.timeout, self.host.list_releases()).await?;
        self.prune(releases, policy).await
    }

    /// Keep the newest `policy.keep_count` of `releases` and delete the rest.
    ///
    /// Each deletion is independent: a failure is recorded on its item and the
    /// pass continues. The tag is deleted even when the release deletion
    /// reported an error, since the release may be gone regardless and a later
    /// pass would no longer list it.
    pub async fn prune(&self, mut releases: Vec<Release>, policy: &RetentionPolicy) -> Result<PruneReport> {
        if policy.keep_count < 1 {
            return Err(Error::InvalidInput(
                "retention keep count must be at least 1".to_string(),
            ));
        }

        releases.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        let excess = releases.split_off(releases.len().min(policy.keep_count));

        let mut report = PruneReport {
            kept: releases.into_iter().map(|r| r.tag).collect(),
            items: Vec::with_capacity(excess.len()),
            dry_run: policy.dry_run,
        };
        info!(
            kept = report.kept.len(),
            excess = excess.len(),
            dry_run = policy.dry_run,
            "Applying retention"
        );

        for release in excess {
            let item = if policy.dry_run {
                info!(release_id = %release.id, tag = %release.tag, "Would delete release");
                PruneItem {
                    release_id: release.id,
                    tag: release.tag,
                    created_at: release.created_at,
                    release: ItemStatus::Planned,
                    tag_status: ItemStatus::Planned,
                }
            } else {
                self.prune_one(release).await
            };
            report.items.push(item);
        }

        let failures = report.items.iter().filter(|i| i.release.is_failure() || i.tag_status.is_failure()).count();
        if failures > 0 {
            warn!(failures, "Retention finished with failures");
        }
        Ok(report)
    }

    async fn prune_one(&self, release: Release) -> PruneItem {
        let release_status = self
            .delete("delete release", &release.id, self.host.delete_release(&release.id))
            .await;

        let tag_status = self
            .delete("delete tag", &release.tag, self.host.delete_tag(&release.tag))
            .await;

        PruneItem {
            release_id: release.id,
            tag: release.tag,
            created_at: release.created_at,
            release: release_status,
            tag_status,
        }
    }

    async fn delete(
        &self,
        operation: &str,
        subject: &str,
        fut: impl Future<Output = Result<()>>,
    ) -> ItemStatus {
        match bounded(format!("{} {}", operation, subject), self.timeout, fut).await {
            Ok(()) => {
                info!(subject, operation, "Deleted");
                ItemStatus::Deleted
            }
            Err(e) if e.is_not_found() => ItemStatus::AlreadyGone,
            Err(e) => {
                error!(subject, operation, error = %e, "Deletion failed");
                ItemStatus::Failed(e.to_string())
            }
        }
    }
}

/// Runs retention on a fixed interval until shut down.
pub struct RetentionWorker {
    manager: RetentionManager,
    policy: RetentionPolicy,
    interval: Duration,
}

impl RetentionWorker {
    pub fn new(manager: RetentionManager, policy: RetentionPolicy, interval: Duration) -> Self {
        Self {
            manager,
            policy,
            interval,
        }
    }

    /// One pass. Errors are logged, not returned, so the loop keeps going.
    pub async fn run_once(&self) -> Option<PruneReport> {
        match self.manager.run(&self.policy).await {
            Ok(report) => {
                info!(deleted = report.deleted(), kept = report.kept.len(), "Retention pass complete");
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "Retention pass failed");
                None
            }
        }
    }

    /// Run a pass every interval until `shutdown` resolves. Returns the number of passes.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> usize {
        info!(interval_secs = self.interval.as_secs(), "Retention worker starting");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut passes = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(passes, "Retention worker shutting down");
                    return passes;
                }
                _ = ticker.tick() => {
                    self.run_once().await;
                    passes += 1;
                }
            }
        }
    }
}
