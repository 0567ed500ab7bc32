//! Build orchestrator - runs every target's step sequence in parallel.

use futures::future::join_all;
use launchpad_config::{ReleaseContext, Timeouts, VariableContext};
use launchpad_core::builder::{BuildRequest, Credentials, LogLine, PlatformBuilder, SigningService};
use launchpad_core::{
    Artifact, ArtifactKey, Error, MediaType, PipelineStep, Platform, PlatformTarget, ResourceId,
    Result, Version,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::checksum::{digest_path, has_content};
use crate::strategy::{PlatformStrategy, StepAction, StepPlan, strategy_for};
use crate::timeout::bounded;

/// Event emitted while targets build.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    TargetStarted { target: String },
    StepStarted { target: String, step: PipelineStep },
    StepLog { target: String, line: LogLine },
    StepCompleted { target: String, step: PipelineStep, success: bool },
    TargetCompleted { target: String, success: bool },
    AllCompleted { succeeded: usize, failed: usize },
}

/// Why a target failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    BuildFailed,
    SignFailed,
    MissingArtifact,
}

/// A target that did not reach `Done`.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformFailure {
    pub target: String,
    pub platform: Platform,
    pub step: PipelineStep,
    pub kind: FailureKind,
    pub message: String,
    /// Whether re-running might succeed.
    pub transient: bool,
}

impl PlatformFailure {
    fn new(target: &PlatformTarget, step: PipelineStep, err: &Error) -> Self {
        let kind = match err {
            Error::MissingArtifact { .. } => FailureKind::MissingArtifact,
            Error::SignFailed { .. } => FailureKind::SignFailed,
            _ if matches!(step, PipelineStep::Sign | PipelineStep::SignInstaller) => {
                FailureKind::SignFailed
            }
            _ => FailureKind::BuildFailed,
        };
        Self {
            target: target.id.clone(),
            platform: target.platform,
            step,
            kind,
            message: err.to_string(),
            transient: err.is_transient(),
        }
    }
}

/// Terminal state of one target.
#[derive(Debug, Clone)]
pub enum PlatformResult {
    Done {
        target: String,
        artifacts: Vec<Artifact>,
    },
    Failed(PlatformFailure),
}

impl PlatformResult {
    pub fn target(&self) -> &str {
        match self {
            PlatformResult::Done { target, .. } => target,
            PlatformResult::Failed(failure) => &failure.target,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, PlatformResult::Done { .. })
    }
}

/// Runs build, sign, package, sign-installer and archive for each target.
///
/// Targets run concurrently, one task each, and never share state. A target's
/// steps run strictly in order because each consumes the previous output.
#[derive(Clone)]
pub struct BuildOrchestrator {
    builders: Vec<Arc<dyn PlatformBuilder>>,
    signers: HashMap<Platform, Arc<dyn SigningService>>,
    credentials: Credentials,
    source_dir: PathBuf,
    product: String,
    timeouts: Timeouts,
    vars: VariableContext,
    events: Option<mpsc::Sender<BuildEvent>>,
}

impl BuildOrchestrator {
    pub fn new(product: impl Into<String>, source_dir: impl Into<PathBuf>, timeouts: Timeouts) -> Self {
        Self {
            builders: Vec::new(),
            signers: HashMap::new(),
            credentials: Credentials::new(),
            source_dir: source_dir.into(),
            product: product.into(),
            timeouts,
            vars: VariableContext::new(),
            events: None,
        }
    }

    /// Add a builder. The first one whose `can_build` accepts a request runs it.
    pub fn with_builder(mut self, builder: Arc<dyn PlatformBuilder>) -> Self {
        self.builders.push(builder);
        self
    }

    pub fn with_signer(mut self, platform: Platform, signer: Arc<dyn SigningService>) -> Self {
        self.signers.insert(platform, signer);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Base variables (git, env, secrets) for command interpolation.
    pub fn with_variables(mut self, vars: VariableContext) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<BuildEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Build every target and wait for all of them to reach a terminal state.
    pub async fn run_all(
        &self,
        targets: &[PlatformTarget],
        version: &Version,
        commit: &str,
    ) -> Vec<PlatformResult> {
        let mut vars = self.vars.clone();
        vars.release = ReleaseContext {
            version: version.to_string(),
            tag: version.tag(),
            product: self.product.clone(),
        };
        vars.git.sha = commit.to_string();
        vars.git.short_sha = commit.chars().take(7).collect();

        info!(targets = targets.len(), version = %version, "Dispatching builds");

        let handles: Vec<_> = targets
            .iter()
            .cloned()
            .map(|target| {
                let this = self.clone();
                let vars = vars.for_target(&target);
                let version = version.clone();
                let commit = commit.to_string();
                tokio::spawn(async move { this.run_target(target, version, commit, vars).await })
            })
            .collect();

        let joined = join_all(handles).await;

        let results: Vec<PlatformResult> = joined
            .into_iter()
            .zip(targets)
            .map(|(joined, target)| match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(target_id = %target.id, error = %e, "Build task aborted");
                    PlatformResult::Failed(PlatformFailure::new(
                        target,
                        PipelineStep::Build,
                        &Error::Internal(format!("build task aborted: {}", e)),
                    ))
                }
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.is_done()).count();
        self.emit(BuildEvent::AllCompleted {
            succeeded,
            failed: results.len() - succeeded,
        })
        .await;
        results
    }

    async fn emit(&self, event: BuildEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    async fn run_target(
        &self,
        target: PlatformTarget,
        version: Version,
        commit: String,
        vars: VariableContext,
    ) -> PlatformResult {
        let strategy = strategy_for(target.platform);
        self.emit(BuildEvent::TargetStarted {
            target: target.id.clone(),
        })
        .await;

        let mut slots: BTreeMap<MediaType, (PathBuf, PipelineStep)> = BTreeMap::new();
        for plan in strategy.plan(&target) {
            self.emit(BuildEvent::StepStarted {
                target: target.id.clone(),
                step: plan.step,
            })
            .await;

            let outcome = self.run_step(&target, &plan, &mut slots, &vars).await;
            self.emit(BuildEvent::StepCompleted {
                target: target.id.clone(),
                step: plan.step,
                success: outcome.is_ok(),
            })
            .await;

            if let Err(e) = outcome {
                return self.fail(&target, plan.step, &e).await;
            }
        }

        match self.finish(&target, strategy, &version, &commit, slots).await {
            Ok(artifacts) => {
                info!(target_id = %target.id, artifacts = artifacts.len(), "Target done");
                self.emit(BuildEvent::TargetCompleted {
                    target: target.id.clone(),
                    success: true,
                })
                .await;
                PlatformResult::Done {
                    target: target.id,
                    artifacts,
                }
            }
            Err((step, e)) => self.fail(&target, step, &e).await,
        }
    }

    async fn fail(&self, target: &PlatformTarget, step: PipelineStep, err: &Error) -> PlatformResult {
        error!(target_id = %target.id, step = %step, error = %err, "Target failed");
        self.emit(BuildEvent::TargetCompleted {
            target: target.id.clone(),
            success: false,
        })
        .await;
        PlatformResult::Failed(PlatformFailure::new(target, step, err))
    }

    async fn run_step(
        &self,
        target: &PlatformTarget,
        plan: &StepPlan,
        slots: &mut BTreeMap<MediaType, (PathBuf, PipelineStep)>,
        vars: &VariableContext,
    ) -> Result<()> {
        match &plan.action {
            StepAction::Run {
                commands,
                input,
                output,
                produces,
            } => {
                let input_path = match input {
                    Some(slot) => Some(self.slot(target, plan.step, slots, *slot)?),
                    None => None,
                };
                let vars = vars.for_step(
                    input_path
                        .as_deref()
                        .map(|p| self.relative(p))
                        .unwrap_or_default(),
                    output.to_string_lossy().into_owned(),
                );

                let mut env = vars.interpolate_map(&target.env);
                env.insert("LAUNCHPAD_VERSION".to_string(), vars.release.version.clone());
                env.insert("LAUNCHPAD_TARGET".to_string(), target.id.clone());

                let request = BuildRequest {
                    id: ResourceId::new(),
                    target: target.id.clone(),
                    platform: target.platform,
                    step: plan.step,
                    image: target.image.clone(),
                    commands: vars.interpolate_vec(commands),
                    working_dir: self.source_dir.clone(),
                    env,
                    outputs: vec![output.clone()],
                    timeout: self.step_timeout(plan.step),
                };
                for command in &request.commands {
                    info!(target_id = %target.id, step = %plan.step, command = %vars.mask(command), "Step command");
                }

                let builder = self.builder_for(&request).await?;
                let result = bounded(
                    format!("{} {}", target.id, plan.step),
                    request.timeout,
                    builder.build(request),
                )
                .await
                .map_err(|e| match e {
                    Error::BuildFailed { .. } | Error::Timeout { .. } => e,
                    other => Error::BuildFailed {
                        platform: target.id.clone(),
                        step: plan.step,
                        message: other.to_string(),
                    },
                })?;

                for line in result.logs {
                    self.emit(BuildEvent::StepLog {
                        target: target.id.clone(),
                        line,
                    })
                    .await;
                }

                let path = self.source_dir.join(output);
                self.verify(target, plan.step, *produces, &path)?;
                slots.insert(*produces, (path, plan.step));
                Ok(())
            }
            StepAction::Sign { slot } => {
                let (unsigned, _) = slots
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| self.missing(target, plan.step, *slot, PathBuf::new()))?;
                let signer = self.signers.get(&target.platform).ok_or_else(|| Error::SignFailed {
                    platform: target.id.clone(),
                    step: plan.step,
                    message: format!("no signing service configured for {}", target.platform),
                })?;

                info!(target_id = %target.id, step = %plan.step, signer = signer.name(), file = %unsigned.display(), "Signing");
                let signed = bounded(
                    format!("{} {}", target.id, plan.step),
                    self.timeouts.sign,
                    signer.sign(&unsigned, &self.credentials),
                )
                .await
                .map_err(|e| match e {
                    Error::Timeout { .. } => e,
                    other => Error::SignFailed {
                        platform: target.id.clone(),
                        step: plan.step,
                        message: other.to_string(),
                    },
                })?;

                if signed == unsigned {
                    return Err(Error::SignFailed {
                        platform: target.id.clone(),
                        step: plan.step,
                        message: "signing service returned its input path".to_string(),
                    });
                }
                self.verify(target, plan.step, *slot, &signed)?;
                // The signed file takes the slot; the unsigned one is never published.
                slots.insert(*slot, (signed, plan.step));
                Ok(())
            }
        }
    }

    /// Current file in `slot`, which an earlier step must have filled.
    fn slot(
        &self,
        target: &PlatformTarget,
        step: PipelineStep,
        slots: &BTreeMap<MediaType, (PathBuf, PipelineStep)>,
        slot: MediaType,
    ) -> Result<PathBuf> {
        slots
            .get(&slot)
            .map(|(path, _)| path.clone())
            .ok_or_else(|| self.missing(target, step, slot, PathBuf::new()))
    }

    fn verify(
        &self,
        target: &PlatformTarget,
        step: PipelineStep,
        media_type: MediaType,
        path: &Path,
    ) -> Result<()> {
        if has_content(path) {
            Ok(())
        } else {
            warn!(target_id = %target.id, step = %step, path = %path.display(), "Step reported success but produced nothing");
            Err(self.missing(target, step, media_type, path.to_path_buf()))
        }
    }

    fn missing(
        &self,
        target: &PlatformTarget,
        step: PipelineStep,
        media_type: MediaType,
        path: PathBuf,
    ) -> Error {
        Error::MissingArtifact {
            platform: target.id.clone(),
            step,
            media_type,
            path,
        }
    }

    /// Re-verify every slot and turn it into an artifact.
    async fn finish(
        &self,
        target: &PlatformTarget,
        strategy: &dyn PlatformStrategy,
        version: &Version,
        commit: &str,
        slots: BTreeMap<MediaType, (PathBuf, PipelineStep)>,
    ) -> std::result::Result<Vec<Artifact>, (PipelineStep, Error)> {
        let mut artifacts = Vec::with_capacity(slots.len());
        for (media_type, (path, step)) in slots {
            if !has_content(&path) {
                return Err((step, self.missing(target, step, media_type, path)));
            }
            let digest_target = path.clone();
            let (size, checksum) = tokio::task::spawn_blocking(move || digest_path(&digest_target))
                .await
                .map_err(|e| (step, Error::Internal(format!("digest task failed: {}", e))))?
                .map_err(|e| (step, Error::Io(e)))?;

            artifacts.push(Artifact {
                key: ArtifactKey {
                    target: target.id.clone(),
                    version: version.clone(),
                    commit: commit.to_string(),
                    media_type,
                },
                platform: target.platform,
                name: Artifact::asset_name(
                    &self.product,
                    &target.id,
                    version,
                    strategy.extension(media_type),
                ),
                path,
                size,
                checksum,
            });
        }
        Ok(artifacts)
    }

    async fn builder_for(&self, request: &BuildRequest) -> Result<Arc<dyn PlatformBuilder>> {
        for builder in &self.builders {
            if builder.can_build(request).await {
                return Ok(builder.clone());
            }
        }
        Err(Error::BuildFailed {
            platform: request.target.clone(),
            step: request.step,
            message: match &request.image {
                Some(image) => format!("no builder available for image {}", image),
                None => "no builder available for host builds".to_string(),
            },
        })
    }

    fn step_timeout(&self, step: PipelineStep) -> std::time::Duration {
        match step {
            PipelineStep::Build => self.timeouts.build,
            PipelineStep::Sign | PipelineStep::SignInstaller => self.timeouts.sign,
            PipelineStep::Package | PipelineStep::Archive => self.timeouts.package,
        }
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.source_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}
