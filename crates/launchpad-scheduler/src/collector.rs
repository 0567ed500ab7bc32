//! Artifact collection: gather what the targets produced into one set.

use launchpad_core::{ArtifactSet, Error, MediaType, Result, Version};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::orchestrator::{PlatformFailure, PlatformResult};

/// The collected artifacts plus the targets that did not contribute.
#[derive(Debug, Clone)]
pub struct Collection {
    pub set: ArtifactSet,
    pub failures: Vec<PlatformFailure>,
}

impl Collection {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn succeeded(&self) -> Vec<String> {
        self.set.targets().map(str::to_string).collect()
    }
}

/// Collects artifacts once every target has reached a terminal state.
pub struct ArtifactCollector {
    version: Version,
    commit: String,
}

impl ArtifactCollector {
    pub fn new(version: Version, commit: impl Into<String>) -> Self {
        Self {
            version,
            commit: commit.into(),
        }
    }

    /// Build the artifact set from `results`.
    ///
    /// Failed targets are logged and carried as missing platforms. A target that
    /// finished without one of its required classes fails the whole collection
    /// rather than publishing a release with a silent gap.
    pub fn collect(
        &self,
        results: Vec<PlatformResult>,
        required: &BTreeMap<String, BTreeSet<MediaType>>,
    ) -> Result<Collection> {
        let mut set = ArtifactSet::new(self.version.clone(), self.commit.clone());
        let mut failures = Vec::new();

        for result in results {
            match result {
                PlatformResult::Done { target, artifacts } => {
                    for artifact in artifacts {
                        if artifact.key.version != self.version || artifact.key.commit != self.commit {
                            return Err(Error::Internal(format!(
                                "artifact {} does not belong to this run",
                                artifact.key.id()
                            )));
                        }
                        set.insert(artifact);
                    }

                    let produced = set.media_types(&target);
                    if let Some(classes) = required.get(&target) {
                        let missing: Vec<MediaType> =
                            classes.difference(&produced).copied().collect();
                        if !missing.is_empty() {
                            return Err(Error::IncompleteArtifacts {
                                platform: target,
                                missing,
                            });
                        }
                    }
                }
                PlatformResult::Failed(failure) => {
                    warn!(
                        target_id = %failure.target,
                        step = %failure.step,
                        kind = ?failure.kind,
                        error = %failure.message,
                        "Platform missing from release"
                    );
                    failures.push(failure);
                }
            }
        }

        if set.is_empty() {
            return Err(Error::CollectionIncomplete {
                failed: failures.into_iter().map(|f| f.target).collect(),
            });
        }

        info!(
            artifacts = set.len(),
            missing = failures.len(),
            "Artifacts collected"
        );
        Ok(Collection { set, failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::FailureKind;
    use launchpad_core::{Artifact, ArtifactKey, PipelineStep, Platform};
    use std::path::PathBuf;

    const COMMIT: &str = "abc1234567890";

    fn version() -> Version {
        Version::parse("1.4.0").unwrap()
    }

    fn artifact(target: &str, media_type: MediaType) -> Artifact {
        Artifact {
            key: ArtifactKey {
                target: target.to_string(),
                version: version(),
                commit: COMMIT.to_string(),
                media_type,
            },
            platform: Platform::Linux,
            path: PathBuf::from(format!("dist/{}", target)),
            name: format!("App-{}-v1.4.0.{}", target, media_type),
            size: 3,
            checksum: "0".repeat(64),
        }
    }

    fn done(target: &str, types: &[MediaType]) -> PlatformResult {
        PlatformResult::Done {
            target: target.to_string(),
            artifacts: types.iter().map(|t| artifact(target, *t)).collect(),
        }
    }

    fn failed(target: &str) -> PlatformResult {
        PlatformResult::Failed(PlatformFailure {
            target: target.to_string(),
            platform: Platform::Windows,
            step: PipelineStep::Sign,
            kind: FailureKind::SignFailed,
            message: "HSM offline".to_string(),
            transient: true,
        })
    }

    fn required(entries: &[(&str, &[MediaType])]) -> BTreeMap<String, BTreeSet<MediaType>> {
        entries
            .iter()
            .map(|(t, types)| (t.to_string(), types.iter().copied().collect()))
            .collect()
    }

    #[test]
    fn test_collects_all_targets() {
        let collector = ArtifactCollector::new(version(), COMMIT);
        let collection = collector
            .collect(
                vec![
                    done("Linux", &[MediaType::Executable, MediaType::Archive]),
                    done("Windows", &[MediaType::Executable]),
                ],
                &required(&[
                    ("Linux", &[MediaType::Archive]),
                    ("Windows", &[MediaType::Executable]),
                ]),
            )
            .unwrap();

        assert_eq!(collection.set.len(), 3);
        assert!(!collection.is_partial());
        assert_eq!(collection.succeeded(), vec!["Linux", "Windows"]);
    }

    #[test]
    fn test_failed_target_is_listed_as_missing() {
        let collector = ArtifactCollector::new(version(), COMMIT);
        let collection = collector
            .collect(
                vec![done("Linux", &[MediaType::Executable]), failed("Windows")],
                &required(&[
                    ("Linux", &[MediaType::Executable]),
                    ("Windows", &[MediaType::Executable]),
                ]),
            )
            .unwrap();

        assert!(collection.is_partial());
        assert_eq!(collection.failures[0].target, "Windows");
        assert!(collection.set.get("Windows").is_none());
    }

    #[test]
    fn test_missing_required_class_fails() {
        let collector = ArtifactCollector::new(version(), COMMIT);
        let err = collector
            .collect(
                vec![done("Windows", &[MediaType::Executable])],
                &required(&[("Windows", &[MediaType::Executable, MediaType::Installer])]),
            )
            .unwrap_err();

        match err {
            Error::IncompleteArtifacts { platform, missing } => {
                assert_eq!(platform, "Windows");
                assert_eq!(missing, vec![MediaType::Installer]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_everything_failed() {
        let collector = ArtifactCollector::new(version(), COMMIT);
        let err = collector
            .collect(vec![failed("Windows"), failed("MacOS")], &BTreeMap::new())
            .unwrap_err();
        match err {
            Error::CollectionIncomplete { failed } => assert_eq!(failed, vec!["Windows", "MacOS"]),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_foreign_artifact_rejected() {
        let mut stray = artifact("Linux", MediaType::Executable);
        stray.key.commit = "fffffff000000".to_string();
        let result = PlatformResult::Done {
            target: "Linux".to_string(),
            artifacts: vec![stray],
        };

        let collector = ArtifactCollector::new(version(), COMMIT);
        assert!(collector.collect(vec![result], &BTreeMap::new()).is_err());
    }
}
