//! Release listing command.

use anyhow::Result;
use std::path::Path;

use super::{load_config, open_host, print_json};

pub async fn list(config_path: &Path, json: bool) -> Result<i32> {
    let config = load_config(config_path)?;
    let host = open_host(&config, false)?;

    let mut releases = host.list_releases().await?;
    releases.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    if json {
        print_json(&releases)?;
        return Ok(0);
    }

    if releases.is_empty() {
        println!("No releases");
        return Ok(0);
    }
    for release in &releases {
        println!(
            "{}{:<16} {:<32} {} {} asset(s)",
            if release.latest { "* " } else { "  " },
            release.tag,
            release.name,
            release.created_at.format("%Y-%m-%d %H:%M"),
            release.assets.len()
        );
    }
    Ok(0)
}
