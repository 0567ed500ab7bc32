//! Reading the declared version from its source file.

use crate::release::VersionSource;
use crate::{ConfigError, ConfigResult};
use launchpad_core::Version;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

// `__VER__ = '1.4.0'`, `__version__ = "1.4.0"`, `version = "1.4.0"`, `"version": "1.4.0"`
static DEFAULT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r##"(?m)^\s*__(?:VER|ver|version|VERSION)__\s*=\s*(['"]?[^\s'"#]+['"]?)"##,
        r#"(?m)^\s*version\s*=\s*(['"][^'"]+['"])"#,
        r#""version"\s*:\s*("[^"]+")"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Read and normalise the version declared at `root/source.path`.
pub fn read_version(root: &Path, source: &VersionSource) -> ConfigResult<Version> {
    let path = root.join(&source.path);
    let content = std::fs::read_to_string(&path)?;
    extract_version(&content, source.pattern.as_deref()).map_err(|e| match e {
        ConfigError::InvalidValue { message, .. } => ConfigError::InvalidValue {
            field: format!("version in {}", path.display()),
            message,
        },
        other => other,
    })
}

/// Extract the version token from file contents.
///
/// A custom `pattern` must have one capture group. Without one, common
/// assignment forms are tried, then a file holding only the version.
pub fn extract_version(content: &str, pattern: Option<&str>) -> ConfigResult<Version> {
    let raw = match pattern {
        Some(pattern) => {
            let re = Regex::new(pattern)
                .map_err(|e| ConfigError::invalid("version-source pattern", e.to_string()))?;
            re.captures(content)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| {
                    ConfigError::invalid("version", format!("pattern '{}' did not match", pattern))
                })?
        }
        None => DEFAULT_PATTERNS
            .iter()
            .find_map(|re| re.captures(content).and_then(|caps| caps.get(1)))
            .map(|m| m.as_str().to_string())
            .or_else(|| bare_token(content))
            .ok_or_else(|| ConfigError::invalid("version", "no version declaration found"))?,
    };

    Version::parse(&raw).map_err(|e| ConfigError::invalid("version", e.to_string()))
}

fn bare_token(content: &str) -> Option<String> {
    let mut lines = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));
    let first = lines.next()?;
    if lines.next().is_some() || first.contains(char::is_whitespace) || first.contains('=') {
        return None;
    }
    Some(first.to_string())
}
