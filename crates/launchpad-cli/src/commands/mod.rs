//! CLI command implementations.

pub mod gate;
pub mod prune;
pub mod releases;
pub mod run;

use anyhow::{Context, Result};
use launchpad_config::ReleaseConfig;
use launchpad_core::ReleaseHost;
use launchpad_host::{GitHubReleaseHost, InMemoryReleaseHost};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

pub fn load_config(path: &Path) -> Result<ReleaseConfig> {
    launchpad_config::load(path)
        .with_context(|| format!("Failed to load release config: {}", path.display()))
}

/// The configured release host, or an empty in-memory one for dry runs.
pub fn open_host(config: &ReleaseConfig, dry_run: bool) -> Result<Arc<dyn ReleaseHost>> {
    if dry_run {
        return Ok(Arc::new(InMemoryReleaseHost::new()));
    }
    let repository = config
        .repository
        .as_deref()
        .context("No `repository` configured; add `repository \"owner/repo\"` to the config")?;
    let host = GitHubReleaseHost::from_env(repository)
        .with_context(|| format!("Failed to create release host for {}", repository))?;
    Ok(Arc::new(host))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn validate(path: &Path) -> Result<i32> {
    match launchpad_config::load(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  product: {}", config.product);
            println!("  version source: {}", config.version_source.path.display());
            println!("  retention: keep {}", config.retention.keep_count);
            for target in &config.targets {
                let required: Vec<String> = target.required.iter().map(|m| m.to_string()).collect();
                println!(
                    "  target {} ({}): {} step(s), requires {}",
                    target.id,
                    target.platform,
                    target.steps.len() + 1,
                    required.join(", ")
                );
            }
            Ok(0)
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            Ok(1)
        }
    }
}
