//! Builder and signer collaborator traits.
//!
//! Builders run a target's build or packaging commands (on the host, in a
//! container, ...). Signers turn an unsigned file into a signed copy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::{PipelineStep, Platform};
use crate::{ResourceId, Result};

/// A single build or packaging invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub id: ResourceId,
    /// Target identifier.
    pub target: String,
    pub platform: Platform,
    pub step: PipelineStep,
    /// Container image to run in, if any.
    pub image: Option<String>,
    /// Shell commands, run in order; the first failure stops the step.
    pub commands: Vec<String>,
    /// Source tree the commands run in.
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    /// Files the step declares it will produce.
    pub outputs: Vec<PathBuf>,
    pub timeout: Duration,
}

/// What a builder reports for a finished step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildOutput {
    /// Output paths the builder claims to have produced.
    pub paths: Vec<PathBuf>,
    pub exit_code: Option<i32>,
    pub logs: Vec<LogLine>,
}

/// A line of log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

impl LogLine {
    pub fn new(stream: LogStream, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

/// Runs build and packaging steps for a target.
#[async_trait]
pub trait PlatformBuilder: Send + Sync {
    /// Name of this builder.
    fn name(&self) -> &'static str;

    /// Check whether this builder can handle the request.
    async fn can_build(&self, request: &BuildRequest) -> bool;

    /// Run the step to completion. A non-zero exit is an error.
    async fn build(&self, request: BuildRequest) -> Result<BuildOutput>;
}

/// Signing credentials. Values never appear in `Debug` output.
#[derive(Clone, Default)]
pub struct Credentials {
    values: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every `{prefix}NAME=value` pair from the process environment as `NAME`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    pub fn from_vars(prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let values = vars
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(prefix).map(|name| (name.to_string(), v)))
            .filter(|(name, _)| !name.is_empty())
            .collect();
        Self { values }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.values.keys().map(|k| (k, "[REDACTED]")))
            .finish()
    }
}

/// Produces a signed copy of a file.
///
/// Implementations must not modify `input` and must be safe to retry.
#[async_trait]
pub trait SigningService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sign `input`, returning the path of the new signed file.
    async fn sign(&self, input: &Path, credentials: &Credentials) -> Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_from_prefixed_vars() {
        let vars = vec![
            ("LAUNCHPAD_SIGN_CERT".to_string(), "cert.pfx".to_string()),
            ("LAUNCHPAD_SIGN_PASSWORD".to_string(), "hunter2".to_string()),
            ("LAUNCHPAD_SIGN_".to_string(), "ignored".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ];
        let creds = Credentials::from_vars("LAUNCHPAD_SIGN_", vars);

        assert_eq!(creds.get("CERT"), Some("cert.pfx"));
        assert_eq!(creds.get("PASSWORD"), Some("hunter2"));
        assert_eq!(creds.iter().count(), 2);
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::new().with("PASSWORD", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("PASSWORD"));
        assert!(!debug.contains("hunter2"));
    }
}
