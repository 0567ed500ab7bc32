//! The release pipeline: gate, build, collect, publish.

use launchpad_config::{ReleaseConfig, read_version};
use launchpad_core::pipeline::{TriggerInfo, TriggerKind};
use launchpad_core::{Error, Release, ReleaseHost, Result, RetentionPolicy, Version};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::collector::ArtifactCollector;
use crate::gate::{GateDecision, VersionGate};
use crate::orchestrator::{BuildOrchestrator, PlatformFailure};
use crate::publisher::ReleasePublisher;
use crate::retention::{PruneReport, RetentionManager};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RunOutcome {
    /// Every target contributed.
    Published,
    /// Published with the successful subset; `failed` names the rest.
    PartiallyPublished,
    /// No configured trigger accepts this invocation.
    Skipped { reason: String },
    /// Scheduled run: retention only.
    Pruned,
}

/// The published release, as reported.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseSummary {
    pub id: String,
    pub tag: String,
    pub name: String,
    pub latest: bool,
    pub assets: Vec<String>,
}

impl From<&Release> for ReleaseSummary {
    fn from(release: &Release) -> Self {
        Self {
            id: release.id.clone(),
            tag: release.tag.clone(),
            name: release.name.clone(),
            latest: release.latest,
            assets: release.assets.iter().map(|a| a.name.clone()).collect(),
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub trigger: TriggerKind,
    pub commit: String,
    pub version: Option<String>,
    pub gate: Option<GateDecision>,
    pub release: Option<ReleaseSummary>,
    pub succeeded: Vec<String>,
    pub failed: Vec<PlatformFailure>,
    pub prune: Option<PruneReport>,
    pub outcome: RunOutcome,
}

impl RunReport {
    fn new(trigger: &TriggerInfo, outcome: RunOutcome) -> Self {
        Self {
            trigger: trigger.kind,
            commit: trigger.revision.clone(),
            version: None,
            gate: None,
            release: None,
            succeeded: Vec::new(),
            failed: Vec::new(),
            prune: None,
            outcome,
        }
    }

    /// Process exit code for a run that returned a report.
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::PartiallyPublished => 3,
            _ => 0,
        }
    }
}

/// Process exit code for a run that failed outright.
pub fn exit_code_for(err: &Error) -> i32 {
    match err {
        Error::GateRejected { .. } => 2,
        Error::CollectionIncomplete { .. } | Error::IncompleteArtifacts { .. } => 4,
        _ => 1,
    }
}

/// Wires the components together for one invocation.
pub struct ReleasePipeline {
    config: ReleaseConfig,
    orchestrator: BuildOrchestrator,
    gate: VersionGate,
    publisher: ReleasePublisher,
    retention: RetentionManager,
}

impl ReleasePipeline {
    pub fn new(
        config: ReleaseConfig,
        host: Arc<dyn ReleaseHost>,
        orchestrator: BuildOrchestrator,
    ) -> Self {
        let timeout = config.timeouts.host;
        Self {
            gate: VersionGate::new(host.clone(), timeout),
            publisher: ReleasePublisher::new(
                host.clone(),
                config.product.clone(),
                config.publish,
                timeout,
            ),
            retention: RetentionManager::new(host, timeout),
            orchestrator,
            config,
        }
    }

    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    /// Read the declared version from the source tree.
    pub fn declared_version(&self) -> Result<Version> {
        Ok(read_version(
            self.orchestrator.source_dir(),
            &self.config.version_source,
        )?)
    }

    /// Run the pipeline for one trigger.
    ///
    /// Gate rejection, a target missing a required class and total build
    /// failure are returned as errors; nothing is published in those cases.
    pub async fn handle(&self, trigger: &TriggerInfo) -> Result<RunReport> {
        if !self.config.triggers.iter().any(|t| t.accepts(trigger)) {
            let reason = match &trigger.branch {
                Some(branch) => format!("no {} trigger configured for branch '{}'", trigger.kind, branch),
                None => format!("no {} trigger configured", trigger.kind),
            };
            info!(trigger = %trigger.kind, reason = %reason, "Run skipped");
            return Ok(RunReport::new(trigger, RunOutcome::Skipped { reason }));
        }

        if trigger.kind == TriggerKind::Scheduled {
            let prune = self.prune(&self.config.retention).await?;
            let mut report = RunReport::new(trigger, RunOutcome::Pruned);
            report.prune = Some(prune);
            return Ok(report);
        }

        let version = self.declared_version()?;
        info!(version = %version, commit = %trigger.revision, trigger = %trigger.kind, "Release run starting");

        let decision = self.gate.evaluate(&version).await?;
        if let Err(e) = decision.ensure() {
            error!(reason = %decision.reason, "Version gate rejected the run");
            return Err(e);
        }

        let results = self
            .orchestrator
            .run_all(&self.config.targets, &version, &trigger.revision)
            .await;

        let collection = ArtifactCollector::new(version.clone(), trigger.revision.clone())
            .collect(results, &self.config.required_classes())?;

        let tag = version.tag();
        let release = self
            .publisher
            .publish(&version, &collection.set, &tag, &collection.failures)
            .await?;

        let outcome = if collection.is_partial() {
            let missing: Vec<&str> = collection.failures.iter().map(|f| f.target.as_str()).collect();
            warn!(tag = %tag, missing = ?missing, "Release published without every platform");
            RunOutcome::PartiallyPublished
        } else {
            RunOutcome::Published
        };

        let mut report = RunReport::new(trigger, outcome);
        report.version = Some(version.to_string());
        report.gate = Some(decision);
        report.release = Some(ReleaseSummary::from(&release));
        report.succeeded = collection.succeeded();
        report.failed = collection.failures;
        Ok(report)
    }

    /// Apply a retention policy against the host's current releases.
    pub async fn prune(&self, policy: &RetentionPolicy) -> Result<PruneReport> {
        self.retention.run(policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::FailureKind;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use launchpad_config::parse_release_config;
    use launchpad_core::builder::{BuildOutput, BuildRequest, Credentials, PlatformBuilder, SigningService};
    use launchpad_core::{PipelineStep, Platform};
    use launchpad_host::InMemoryReleaseHost;
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    const CONFIG: &str = r#"
        product "App"
        version-source "ver.py"

        on "push" branches="main"
        on "manual"
        on "schedule" cron="0 3 * * *"

        retention keep=2

        signing "windows" command="sign ${step.output}"

        target "Windows" platform="windows" {
            build "build windows"
            output "dist/App.exe"
            steps "sign"
        }

        target "Linux" platform="linux" {
            build "build linux"
            output "dist/App"
        }
    "#;

    #[derive(Default)]
    struct FakeBuilder {
        fail_targets: HashSet<String>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl PlatformBuilder for FakeBuilder {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn can_build(&self, _request: &BuildRequest) -> bool {
            true
        }

        async fn build(&self, request: BuildRequest) -> Result<BuildOutput> {
            *self.calls.lock().unwrap() += 1;
            if self.fail_targets.contains(&request.target) {
                return Err(Error::BuildFailed {
                    platform: request.target.clone(),
                    step: request.step,
                    message: "exit 1".to_string(),
                });
            }
            for output in &request.outputs {
                let path = request.working_dir.join(output);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, request.target.as_bytes()).unwrap();
            }
            Ok(BuildOutput {
                paths: request.outputs.clone(),
                exit_code: Some(0),
                logs: vec![],
            })
        }
    }

    struct FakeSigner {
        fail: bool,
    }

    #[async_trait]
    impl SigningService for FakeSigner {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn sign(&self, input: &Path, _credentials: &Credentials) -> Result<PathBuf> {
            if self.fail {
                return Err(Error::External {
                    message: "signing service unavailable".to_string(),
                    transient: true,
                });
            }
            let output = input.with_extension("signed.exe");
            std::fs::copy(input, &output)?;
            Ok(output)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        host: Arc<InMemoryReleaseHost>,
        builder: Arc<FakeBuilder>,
        pipeline: ReleasePipeline,
    }

    fn fixture(version_file: &str, builder: FakeBuilder, sign_fails: bool) -> Fixture {
        fixture_with(CONFIG, version_file, builder, sign_fails)
    }

    fn fixture_with(
        config: &str,
        version_file: &str,
        builder: FakeBuilder,
        sign_fails: bool,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ver.py"), version_file).unwrap();

        let config = parse_release_config(config).unwrap();
        let host = Arc::new(InMemoryReleaseHost::new());
        let builder = Arc::new(builder);
        let orchestrator = BuildOrchestrator::new("App", dir.path(), config.timeouts)
            .with_builder(builder.clone())
            .with_signer(Platform::Windows, Arc::new(FakeSigner { fail: sign_fails }));

        Fixture {
            pipeline: ReleasePipeline::new(config, host.clone(), orchestrator),
            _dir: dir,
            host,
            builder,
        }
    }

    fn trigger(kind: TriggerKind, branch: Option<&str>) -> TriggerInfo {
        TriggerInfo {
            kind,
            revision: "abc1234567890".to_string(),
            branch: branch.map(str::to_string),
            actor: None,
        }
    }

    #[tokio::test]
    async fn test_full_release() {
        let f = fixture("__VER__ = '1.4.0'\n", FakeBuilder::default(), false);

        let report = f
            .pipeline
            .handle(&trigger(TriggerKind::Push, Some("main")))
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Published);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.version.as_deref(), Some("1.4.0"));
        assert_eq!(report.succeeded, vec!["Linux", "Windows"]);

        let release = report.release.unwrap();
        assert_eq!(release.tag, "1.4.0");
        assert!(release.latest);
        assert_eq!(
            release.assets,
            vec!["App-Linux-v1.4.0", "App-Windows-v1.4.0.exe"]
        );
    }

    #[tokio::test]
    async fn test_partial_release_when_signing_fails() {
        let f = fixture("__VER__ = '1.4.0'\n", FakeBuilder::default(), true);

        let report = f.pipeline.handle(&trigger(TriggerKind::Manual, None)).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::PartiallyPublished);
        assert_eq!(report.exit_code(), 3);
        assert_eq!(report.succeeded, vec!["Linux"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].target, "Windows");
        assert_eq!(report.failed[0].kind, FailureKind::SignFailed);
        assert_eq!(report.failed[0].step, PipelineStep::Sign);

        let releases = f.host.releases().await;
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].assets.len(), 1);
        assert!(releases[0].body.contains("Missing platforms"));
    }

    #[tokio::test]
    async fn test_gate_rejection_stops_before_builds() {
        let f = fixture("__VER__ = '1.4.0'\n", FakeBuilder::default(), false);
        f.host
            .seed("1.4.0", Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(), true)
            .await;

        let err = f
            .pipeline
            .handle(&trigger(TriggerKind::Push, Some("main")))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::GateRejected { .. }));
        assert_eq!(exit_code_for(&err), 2);
        assert_eq!(*f.builder.calls.lock().unwrap(), 0);
        assert_eq!(f.host.upsert_calls().await, 0);
    }

    #[tokio::test]
    async fn test_prerelease_cannot_be_published_twice() {
        let config = format!("{}\npublish prerelease=#true\n", CONFIG);
        let f = fixture_with(&config, "__VER__ = '1.5.0'\n", FakeBuilder::default(), false);
        f.host
            .seed("1.4.0", Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(), true)
            .await;
        let t = trigger(TriggerKind::Manual, None);

        let first = f.pipeline.handle(&t).await.unwrap();
        assert_eq!(first.outcome, RunOutcome::Published);
        assert!(!first.release.unwrap().latest);

        let err = f.pipeline.handle(&t).await.unwrap_err();
        assert!(matches!(err, Error::GateRejected { .. }));
        assert_eq!(exit_code_for(&err), 2);
        assert_eq!(f.host.upsert_calls().await, 1);
    }

    #[tokio::test]
    async fn test_all_failed_publishes_nothing() {
        let builder = FakeBuilder {
            fail_targets: HashSet::from(["Windows".to_string(), "Linux".to_string()]),
            ..Default::default()
        };
        let f = fixture("__VER__ = '1.4.0'\n", builder, false);

        let err = f.pipeline.handle(&trigger(TriggerKind::Manual, None)).await.unwrap_err();

        assert!(matches!(err, Error::CollectionIncomplete { .. }));
        assert_eq!(exit_code_for(&err), 4);
        assert_eq!(f.host.upsert_calls().await, 0);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let f = fixture("__VER__ = '1.4.0'\n", FakeBuilder::default(), false);
        let t = trigger(TriggerKind::Manual, None);

        let first = f.pipeline.handle(&t).await.unwrap();
        // The gate now rejects; publishing the same set again through the publisher is a no-op.
        assert!(matches!(
            f.pipeline.handle(&t).await.unwrap_err(),
            Error::GateRejected { .. }
        ));
        assert_eq!(f.host.releases().await.len(), 1);
        assert_eq!(first.release.unwrap().assets.len(), 2);
    }

    #[tokio::test]
    async fn test_unlisted_branch_is_skipped() {
        let f = fixture("__VER__ = '1.4.0'\n", FakeBuilder::default(), false);

        let report = f
            .pipeline
            .handle(&trigger(TriggerKind::Push, Some("feature/x")))
            .await
            .unwrap();

        assert!(matches!(report.outcome, RunOutcome::Skipped { .. }));
        assert_eq!(report.exit_code(), 0);
        assert_eq!(*f.builder.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scheduled_run_prunes_only() {
        let f = fixture("__VER__ = '1.4.0'\n", FakeBuilder::default(), false);
        for day in 1..=4 {
            f.host
                .seed(
                    &format!("1.{}.0", day),
                    Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap(),
                    day == 4,
                )
                .await;
        }

        let report = f
            .pipeline
            .handle(&trigger(TriggerKind::Scheduled, None))
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Pruned);
        assert_eq!(report.prune.unwrap().deleted(), 2);
        assert_eq!(f.host.releases().await.len(), 2);
        assert_eq!(*f.builder.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_version_fails() {
        let f = fixture("nothing to see here\n", FakeBuilder::default(), false);
        let err = f.pipeline.handle(&trigger(TriggerKind::Manual, None)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(exit_code_for(&err), 1);
    }
}
