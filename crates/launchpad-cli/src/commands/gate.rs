//! Version gate command.

use anyhow::{Context, Result};
use launchpad_config::read_version;
use launchpad_scheduler::VersionGate;
use std::path::Path;

use super::{load_config, open_host, print_json};

pub async fn gate(config_path: &Path, source_dir: &Path, json: bool) -> Result<i32> {
    let config = load_config(config_path)?;
    let version = read_version(source_dir, &config.version_source).with_context(|| {
        format!(
            "Failed to read version from {}",
            source_dir.join(&config.version_source.path).display()
        )
    })?;

    let host = open_host(&config, false)?;
    let decision = VersionGate::new(host, config.timeouts.host)
        .evaluate(&version)
        .await?;

    if json {
        print_json(&decision)?;
    } else if decision.proceed {
        println!("✓ {}", decision.reason);
    } else {
        println!("✗ {}", decision.reason);
    }
    Ok(if decision.proceed { 0 } else { 2 })
}
