//! Produced artifacts and the per-run artifact set.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::platform::{MediaType, Platform};
use crate::version::Version;

/// Deterministic identity of an artifact across re-runs of the same commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Target identifier.
    pub target: String,
    pub version: Version,
    /// Full commit SHA.
    pub commit: String,
    pub media_type: MediaType,
}

impl ArtifactKey {
    /// External identifier, e.g. `Windows@1.4.0+abc1234/installer`.
    pub fn id(&self) -> String {
        format!(
            "{}@{}+{}/{}",
            self.target,
            self.version,
            short_commit(&self.commit),
            self.media_type
        )
    }
}

/// A single produced file attributable to one target build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub key: ArtifactKey,
    pub platform: Platform,
    /// Location on disk.
    pub path: PathBuf,
    /// Published asset name, `{product}-{target}-v{version}.{ext}`, without
    /// the dot when the extension is empty.
    pub name: String,
    pub size: u64,
    /// Hex SHA-256 of the file contents.
    pub checksum: String,
}

impl Artifact {
    pub fn asset_name(product: &str, target: &str, version: &Version, extension: &str) -> String {
        if extension.is_empty() {
            return format!("{}-{}-v{}", product, target, version);
        }
        format!("{}-{}-v{}.{}", product, target, version, extension)
    }

    pub fn media_type(&self) -> MediaType {
        self.key.media_type
    }
}

/// Artifacts of one pipeline run, grouped by target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub version: Version,
    pub commit: String,
    artifacts: BTreeMap<String, Vec<Artifact>>,
}

impl ArtifactSet {
    pub fn new(version: Version, commit: impl Into<String>) -> Self {
        Self {
            version,
            commit: commit.into(),
            artifacts: BTreeMap::new(),
        }
    }

    /// Add an artifact, replacing any earlier one with the same key.
    pub fn insert(&mut self, artifact: Artifact) {
        let entry = self.artifacts.entry(artifact.key.target.clone()).or_default();
        entry.retain(|a| a.key != artifact.key);
        entry.push(artifact);
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    pub fn get(&self, target: &str) -> Option<&[Artifact]> {
        self.artifacts.get(target).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.artifacts.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn media_types(&self, target: &str) -> BTreeSet<MediaType> {
        self.get(target)
            .map(|list| list.iter().map(Artifact::media_type).collect())
            .unwrap_or_default()
    }

    /// True when every target in `required` has contributed at least its required classes.
    pub fn is_complete(&self, required: &BTreeMap<String, BTreeSet<MediaType>>) -> bool {
        required.iter().all(|(target, classes)| {
            self.artifacts.contains_key(target) && self.media_types(target).is_superset(classes)
        })
    }
}

pub fn short_commit(sha: &str) -> String {
    sha.chars().take(7).collect()
}
