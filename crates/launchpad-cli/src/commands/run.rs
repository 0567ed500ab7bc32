//! Release pipeline command.

use anyhow::{Context, Result};
use launchpad_config::{ReleaseConfig, VariableContext, VariableContextBuilder};
use launchpad_core::pipeline::{TriggerInfo, TriggerKind};
use launchpad_executor::{
    CommandSigner, Credentials, DockerBuilder, LocalProcessBuilder, LogStream,
};
use launchpad_scheduler::{
    BuildEvent, BuildOrchestrator, ReleasePipeline, RunOutcome, RunReport, exit_code_for,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use super::{load_config, open_host, print_json};

/// Prefix of environment variables holding signing credentials.
const CREDENTIAL_PREFIX: &str = "LAUNCHPAD_SIGN_";

pub struct RunOptions {
    pub source_dir: PathBuf,
    pub trigger: TriggerKind,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub dry_run: bool,
    pub json: bool,
    pub verbose: bool,
}

/// Run the pipeline and return the process exit code.
pub async fn run(config_path: &Path, options: RunOptions) -> Result<i32> {
    let config = load_config(config_path)?;
    let source_dir = options
        .source_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve source dir: {}", options.source_dir.display()))?;

    let credentials = Credentials::from_env(CREDENTIAL_PREFIX);
    let mut vars = VariableContextBuilder::new()
        .with_secrets(credentials.iter())
        .build();
    vars.populate_env();
    vars.populate_git_from_env();

    let trigger = trigger_info(&options, &vars)?;
    if options.dry_run {
        println!("Dry run: artifacts are built but published to an in-memory host");
    }

    let host = open_host(&config, options.dry_run)?;
    let (tx, rx) = mpsc::channel(256);
    let orchestrator = orchestrator(&config, &source_dir, credentials, vars)?.with_events(tx);
    let pipeline = ReleasePipeline::new(config, host, orchestrator);

    let renderer = tokio::spawn(render_events(rx, options.verbose && !options.json));
    let result = pipeline.handle(&trigger).await;
    // Dropping the pipeline closes the event channel.
    drop(pipeline);
    let _ = renderer.await;

    match result {
        Ok(report) => {
            if options.json {
                print_json(&report)?;
            } else {
                print_report(&report);
            }
            Ok(report.exit_code())
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            Ok(exit_code_for(&e))
        }
    }
}

fn trigger_info(options: &RunOptions, vars: &VariableContext) -> Result<TriggerInfo> {
    let revision = options
        .commit
        .clone()
        .or_else(|| Some(vars.git.sha.clone()).filter(|s| !s.is_empty()))
        .context("Commit SHA unknown; pass --commit or set LAUNCHPAD_COMMIT_SHA")?;
    let branch = options
        .branch
        .clone()
        .or_else(|| Some(vars.git.branch.clone()).filter(|b| !b.is_empty()));

    Ok(TriggerInfo {
        kind: options.trigger,
        revision,
        branch,
        actor: vars.env.get("GITHUB_ACTOR").cloned(),
    })
}

/// Builders for the configured targets, one signer per configured platform.
fn orchestrator(
    config: &ReleaseConfig,
    source_dir: &Path,
    credentials: Credentials,
    vars: VariableContext,
) -> Result<BuildOrchestrator> {
    let mut orchestrator = BuildOrchestrator::new(config.product.clone(), source_dir, config.timeouts)
        .with_credentials(credentials)
        .with_variables(vars);

    if config.targets.iter().any(|t| t.image.is_some()) {
        match DockerBuilder::new() {
            Ok(docker) => orchestrator = orchestrator.with_builder(Arc::new(docker)),
            Err(e) => warn!(error = %e, "Docker unavailable; containerised targets will fail"),
        }
    }
    orchestrator = orchestrator.with_builder(Arc::new(LocalProcessBuilder::new()));

    for (platform, command) in &config.signing {
        orchestrator = orchestrator.with_signer(*platform, Arc::new(CommandSigner::new(command.clone())));
    }
    Ok(orchestrator)
}

async fn render_events(mut rx: mpsc::Receiver<BuildEvent>, verbose: bool) {
    while let Some(event) = rx.recv().await {
        match event {
            BuildEvent::TargetStarted { target } => {
                println!("▶ {} started", target);
            }
            BuildEvent::StepStarted { target, step } => {
                println!("  [{}] {}", target, step);
            }
            BuildEvent::StepLog { target, line } => {
                if verbose {
                    let marker = match line.stream {
                        LogStream::Stdout => " ",
                        LogStream::Stderr => "!",
                        LogStream::System => "*",
                    };
                    println!("  [{}]{} {}", target, marker, line.content);
                }
            }
            BuildEvent::StepCompleted { target, step, success } => {
                if !success {
                    println!("  [{}] {} failed", target, step);
                }
            }
            BuildEvent::TargetCompleted { target, success } => {
                if success {
                    println!("✓ {} done", target);
                } else {
                    println!("✗ {} failed", target);
                }
            }
            BuildEvent::AllCompleted { succeeded, failed } => {
                println!("--- Builds finished: {} succeeded, {} failed ---", succeeded, failed);
            }
        }
    }
}

fn print_report(report: &RunReport) {
    match &report.outcome {
        RunOutcome::Skipped { reason } => {
            println!("⊘ Skipped: {}", reason);
            return;
        }
        RunOutcome::Pruned => {
            if let Some(prune) = &report.prune {
                super::prune::print_report(prune);
            }
            return;
        }
        RunOutcome::Published | RunOutcome::PartiallyPublished => {}
    }

    if let Some(release) = &report.release {
        println!("\nRelease {} ({})", release.name, release.tag);
        for asset in &release.assets {
            println!("  {}", asset);
        }
    }
    if !report.failed.is_empty() {
        println!("\nMissing platforms:");
        for failure in &report.failed {
            println!(
                "  {} - {:?} at {}: {}",
                failure.target, failure.kind, failure.step, failure.message
            );
        }
    }
    match report.outcome {
        RunOutcome::Published => println!("\n✓ Published"),
        _ => println!("\n! Published with {} platform(s) missing", report.failed.len()),
    }
}
