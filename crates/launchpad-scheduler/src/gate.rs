//! Version gate: refuse to release a version that is already published.

use launchpad_core::release::latest_tag;
use launchpad_core::version::normalize;
use launchpad_core::{Error, Release, ReleaseHost, Result, Version};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::timeout::bounded;

/// Outcome of the gate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub proceed: bool,
    pub reason: String,
    pub version: String,
    pub latest_tag: Option<String>,
}

impl GateDecision {
    /// Turn a rejection into [`Error::GateRejected`].
    pub fn ensure(&self) -> Result<()> {
        if self.proceed {
            return Ok(());
        }
        Err(Error::GateRejected {
            version: self.version.clone(),
            latest_tag: self.latest_tag.clone().unwrap_or_default(),
        })
    }
}

/// Decide whether a pipeline for `declared` may proceed given the latest published tag.
///
/// Pure: no I/O, same answer for the same inputs.
pub fn check_gate(declared: &Version, latest_published_tag: Option<&str>) -> GateDecision {
    let version = declared.as_str().to_string();
    match latest_published_tag.map(normalize) {
        None => GateDecision {
            proceed: true,
            reason: format!("no published release yet; {} will be the first", version),
            version,
            latest_tag: None,
        },
        Some(latest) if latest == version => GateDecision {
            proceed: false,
            reason: format!(
                "declared version '{}' equals latest published tag '{}'; bump the version",
                version, latest
            ),
            version,
            latest_tag: Some(latest),
        },
        Some(latest) => GateDecision {
            proceed: true,
            reason: format!("declared version '{}' differs from latest tag '{}'", version, latest),
            version,
            latest_tag: Some(latest),
        },
    }
}

/// Apply [`check_gate`] to the latest release, then reject a version already
/// published under any tag.
///
/// The latest flag alone misses prereleases, drafts and a flag left on an
/// older release.
pub fn check_releases(declared: &Version, releases: &[Release]) -> GateDecision {
    let decision = check_gate(declared, latest_tag(releases));
    if !decision.proceed {
        return decision;
    }
    match releases
        .iter()
        .find(|r| normalize(&r.tag) == declared.as_str())
    {
        Some(existing) => GateDecision {
            proceed: false,
            reason: format!(
                "declared version '{}' is already published as release '{}'; bump the version",
                decision.version, existing.tag
            ),
            latest_tag: Some(normalize(&existing.tag)),
            version: decision.version,
        },
        None => decision,
    }
}

/// Reads the release host's current state and applies [`check_releases`].
pub struct VersionGate {
    host: Arc<dyn ReleaseHost>,
    timeout: Duration,
}

impl VersionGate {
    pub fn new(host: Arc<dyn ReleaseHost>, timeout: Duration) -> Self {
        Self { host, timeout }
    }

    pub async fn evaluate(&self, declared: &Version) -> Result<GateDecision> {
        let releases = bounded("list releases", self.timeout, self.host.list_releases()).await?;
        let decision = check_releases(declared, &releases);
        info!(
            version = %decision.version,
            latest = ?decision.latest_tag,
            proceed = decision.proceed,
            "Version gate evaluated"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use launchpad_host::InMemoryReleaseHost;

    fn version(raw: &str) -> Version {
        Version::parse(raw).unwrap()
    }

    #[test]
    fn test_first_release_proceeds() {
        let decision = check_gate(&version("1.0.0"), None);
        assert!(decision.proceed);
        assert!(decision.ensure().is_ok());
    }

    #[test]
    fn test_unchanged_version_rejected() {
        let decision = check_gate(&version("'1.4.0'"), Some("1.4.0"));
        assert!(!decision.proceed);
        assert!(decision.reason.contains("'1.4.0'"));

        let err = decision.ensure().unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::GateRejected { .. }));
        assert!(message.contains("declared version '1.4.0'"));
        assert!(message.contains("published tag '1.4.0'"));
    }

    #[test]
    fn test_quoted_tag_is_normalised() {
        assert!(!check_gate(&version("1.4.0"), Some("\"1.4.0\"")).proceed);
    }

    #[test]
    fn test_changed_version_proceeds() {
        assert!(check_gate(&version("1.4.1"), Some("1.4.0")).proceed);
        // Opaque comparison: a lower version still differs.
        assert!(check_gate(&version("1.3.0"), Some("1.4.0")).proceed);
        // A leading v is significant.
        assert!(check_gate(&version("v1.4.0"), Some("1.4.0")).proceed);
    }

    #[test]
    fn test_check_is_repeatable() {
        let v = version("2.0.0");
        assert_eq!(check_gate(&v, Some("1.0.0")), check_gate(&v, Some("1.0.0")));
    }

    #[tokio::test]
    async fn test_reads_latest_from_host() {
        let host = Arc::new(InMemoryReleaseHost::new());
        host.seed("1.3.0", Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(), false)
            .await;
        host.seed("1.4.0", Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(), true)
            .await;

        let gate = VersionGate::new(host.clone(), Duration::from_secs(5));
        let decision = gate.evaluate(&version("1.4.0")).await.unwrap();
        assert!(!decision.proceed);
        assert_eq!(decision.latest_tag.as_deref(), Some("1.4.0"));

        let decision = gate.evaluate(&version("1.5.0")).await.unwrap();
        assert!(decision.proceed);
    }
    #[tokio::test]
    async fn test_rejects_version_published_without_latest_flag() {
        let host = Arc::new(InMemoryReleaseHost::new());
        host.seed("1.4.0", Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(), true)
            .await;
        // Prerelease: newer, but never flagged latest.
        host.seed("1.5.0", Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(), false)
            .await;

        let gate = VersionGate::new(host.clone(), Duration::from_secs(5));
        let decision = gate.evaluate(&version("1.5.0")).await.unwrap();
        assert!(!decision.proceed);
        assert_eq!(decision.latest_tag.as_deref(), Some("1.5.0"));
        assert!(decision.reason.contains("already published"));
        assert!(matches!(decision.ensure(), Err(Error::GateRejected { .. })));

        assert!(gate.evaluate(&version("1.6.0")).await.unwrap().proceed);
    }

    #[test]
    fn test_rejects_version_behind_stale_latest_flag() {
        let at = |day| Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap();
        let release = |tag: &str, day, latest| Release {
            id: tag.to_string(),
            tag: tag.to_string(),
            name: tag.to_string(),
            body: String::new(),
            created_at: at(day),
            updated_at: at(day),
            assets: Vec::new(),
            latest,
        };
        let releases = vec![release("1.0.0", 1, true), release("'1.1.0'", 2, false)];

        assert!(!check_releases(&version("1.1.0"), &releases).proceed);
        assert!(!check_releases(&version("1.0.0"), &releases).proceed);
        assert!(check_releases(&version("1.2.0"), &releases).proceed);
    }
}
