//! In-memory release host.
//!
//! Mirrors the GitHub semantics the pipeline relies on: releases and tags are
//! separate objects, assets are replaced by name, and the "latest" flag moves
//! atomically with the upsert that claims it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_core::{
    Artifact, Error, Release, ReleaseAsset, ReleaseHost, ReleaseMetadata, Result,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    releases: Vec<Release>,
    tags: BTreeSet<String>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

#[derive(Default)]
struct Faults {
    release_deletions: HashSet<String>,
    tag_deletions: HashSet<String>,
    conflicts: u32,
    list_unavailable: bool,
    upsert_delay: Option<Duration>,
}

#[derive(Default)]
struct Stats {
    upserts: u32,
    uploads: u32,
    in_flight: HashMap<String, u32>,
    max_in_flight: u32,
}

/// Release host backed by process memory.
#[derive(Default)]
pub struct InMemoryReleaseHost {
    state: Mutex<State>,
    faults: Mutex<Faults>,
    stats: Mutex<Stats>,
}

impl InMemoryReleaseHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an existing release and its tag.
    pub async fn seed(&self, tag: &str, created_at: DateTime<Utc>, latest: bool) -> String {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        if latest {
            for release in &mut state.releases {
                release.latest = false;
            }
        }
        state.releases.push(Release {
            id: id.clone(),
            tag: tag.to_string(),
            name: tag.to_string(),
            body: String::new(),
            created_at,
            updated_at: created_at,
            assets: Vec::new(),
            latest,
        });
        state.tags.insert(tag.to_string());
        id
    }

    pub async fn releases(&self) -> Vec<Release> {
        self.state.lock().await.releases.clone()
    }

    pub async fn tags(&self) -> BTreeSet<String> {
        self.state.lock().await.tags.clone()
    }

    /// Make `delete_release(id)` fail with a non-transient error.
    pub async fn fail_release_deletion(&self, id: &str) {
        self.faults
            .lock()
            .await
            .release_deletions
            .insert(id.to_string());
    }

    /// Make `delete_tag(name)` fail with a non-transient error.
    pub async fn fail_tag_deletion(&self, name: &str) {
        self.faults.lock().await.tag_deletions.insert(name.to_string());
    }

    /// Make the next `count` upserts fail with a publish conflict.
    pub async fn inject_conflicts(&self, count: u32) {
        self.faults.lock().await.conflicts = count;
    }

    /// Make `list_releases` fail with a transient error.
    pub async fn set_list_unavailable(&self, unavailable: bool) {
        self.faults.lock().await.list_unavailable = unavailable;
    }

    /// Hold each upsert open for `delay` before it commits.
    pub async fn set_upsert_delay(&self, delay: Duration) {
        self.faults.lock().await.upsert_delay = Some(delay);
    }

    /// Upsert calls received, including failed ones.
    pub async fn upsert_calls(&self) -> u32 {
        self.stats.lock().await.upserts
    }

    /// Asset uploads performed (skipped identical assets excluded).
    pub async fn uploads(&self) -> u32 {
        self.stats.lock().await.uploads
    }

    /// Highest number of upserts seen running at once for a single tag.
    pub async fn max_concurrent_upserts(&self) -> u32 {
        self.stats.lock().await.max_in_flight
    }

    async fn enter(&self, tag: &str) {
        let mut stats = self.stats.lock().await;
        stats.upserts += 1;
        let count = stats.in_flight.entry(tag.to_string()).or_default();
        *count += 1;
        let count = *count;
        stats.max_in_flight = stats.max_in_flight.max(count);
    }

    async fn leave(&self, tag: &str) {
        let mut stats = self.stats.lock().await;
        if let Some(count) = stats.in_flight.get_mut(tag) {
            *count = count.saturating_sub(1);
        }
    }

    async fn commit(
        &self,
        tag: &str,
        metadata: &ReleaseMetadata,
        artifacts: &[Artifact],
    ) -> Result<Release> {
        {
            let mut faults = self.faults.lock().await;
            if faults.conflicts > 0 {
                faults.conflicts -= 1;
                return Err(Error::PublishConflict {
                    tag: tag.to_string(),
                    attempts: 1,
                });
            }
        }

        let now = Utc::now();
        let mut uploads = 0;
        let mut state = self.state.lock().await;

        let index = match state.releases.iter().position(|r| r.tag == tag) {
            Some(index) => index,
            None => {
                let id = state.next_id();
                state.releases.push(Release {
                    id,
                    tag: tag.to_string(),
                    name: metadata.name.clone(),
                    body: String::new(),
                    created_at: now,
                    updated_at: now,
                    assets: Vec::new(),
                    latest: false,
                });
                state.tags.insert(tag.to_string());
                state.releases.len() - 1
            }
        };

        let mut asset_ids = Vec::new();
        for artifact in artifacts {
            let unchanged = state.releases[index].assets.iter().any(|a| {
                a.name == artifact.name && a.checksum.as_deref() == Some(artifact.checksum.as_str())
            });
            if !unchanged {
                asset_ids.push((artifact, state.next_id()));
            }
        }

        let release = &mut state.releases[index];
        release.name = metadata.name.clone();
        release.body = metadata.body.clone();
        release.updated_at = now;
        for (artifact, id) in asset_ids {
            release.assets.retain(|a| a.name != artifact.name);
            release.assets.push(ReleaseAsset {
                id,
                name: artifact.name.clone(),
                label: Some(artifact.key.id()),
                size: artifact.size,
                checksum: Some(artifact.checksum.clone()),
            });
            uploads += 1;
        }

        if metadata.make_latest {
            for (i, release) in state.releases.iter_mut().enumerate() {
                release.latest = i == index;
            }
        }
        let result = state.releases[index].clone();
        drop(state);

        self.stats.lock().await.uploads += uploads;
        Ok(result)
    }
}

#[async_trait]
impl ReleaseHost for InMemoryReleaseHost {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_releases(&self) -> Result<Vec<Release>> {
        if self.faults.lock().await.list_unavailable {
            return Err(Error::External {
                message: "release listing unavailable".to_string(),
                transient: true,
            });
        }
        Ok(self.state.lock().await.releases.clone())
    }

    async fn upsert_release(
        &self,
        tag: &str,
        metadata: &ReleaseMetadata,
        artifacts: &[Artifact],
    ) -> Result<Release> {
        self.enter(tag).await;
        let delay = self.faults.lock().await.upsert_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.commit(tag, metadata, artifacts).await;
        self.leave(tag).await;
        result
    }

    async fn delete_release(&self, id: &str) -> Result<()> {
        if self.faults.lock().await.release_deletions.contains(id) {
            return Err(Error::External {
                message: format!("refused to delete release {}", id),
                transient: false,
            });
        }
        let mut state = self.state.lock().await;
        let before = state.releases.len();
        state.releases.retain(|r| r.id != id);
        if state.releases.len() == before {
            return Err(Error::NotFound(format!("release {}", id)));
        }
        Ok(())
    }

    async fn delete_tag(&self, name: &str) -> Result<()> {
        if self.faults.lock().await.tag_deletions.contains(name) {
            return Err(Error::External {
                message: format!("refused to delete tag {}", name),
                transient: false,
            });
        }
        if self.state.lock().await.tags.remove(name) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("tag {}", name)))
        }
    }
}
