//! Retention commands.

use anyhow::Result;
use launchpad_core::RetentionPolicy;
use launchpad_scheduler::{ItemStatus, PruneReport, RetentionManager, RetentionWorker};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::{load_config, open_host, print_json};

pub async fn prune(
    config_path: &Path,
    keep: Option<usize>,
    dry_run: bool,
    watch: Option<u64>,
    json: bool,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let policy = match keep {
        Some(keep) => RetentionPolicy::keep_last(keep)?,
        None => config.retention,
    }
    .dry_run(dry_run);

    let host = open_host(&config, false)?;
    let manager = RetentionManager::new(host, config.timeouts.host);

    if let Some(secs) = watch {
        let worker = RetentionWorker::new(manager, policy, Duration::from_secs(secs.max(1)));
        let passes = worker
            .run_until(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
        info!(passes, "Retention worker stopped");
        return Ok(0);
    }

    let report = manager.run(&policy).await?;
    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(0)
}

pub fn print_report(report: &PruneReport) {
    println!("Keeping {} release(s)", report.kept.len());
    if report.items.is_empty() {
        println!("Nothing to prune");
        return;
    }
    for item in &report.items {
        println!(
            "  {} ({}): release {}, tag {}",
            item.tag,
            item.created_at.format("%Y-%m-%d"),
            status(&item.release),
            status(&item.tag_status)
        );
    }
    let failures = report.failures();
    if report.dry_run {
        println!("Dry run: nothing was deleted");
    } else if failures.is_empty() {
        println!("✓ Pruned {} release(s)", report.deleted());
    } else {
        println!(
            "! Pruned {} release(s), {} item(s) failed",
            report.deleted(),
            failures.len()
        );
    }
}

fn status(status: &ItemStatus) -> String {
    match status {
        ItemStatus::Deleted => "deleted".to_string(),
        ItemStatus::AlreadyGone => "already gone".to_string(),
        ItemStatus::Failed(message) => format!("FAILED ({})", message),
        ItemStatus::Planned => "would delete".to_string(),
    }
}
