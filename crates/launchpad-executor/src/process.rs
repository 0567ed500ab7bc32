//! Host process builder for targets without a container image.

use async_trait::async_trait;
use launchpad_core::builder::*;
use launchpad_core::{Error, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs step commands through the host shell, one after another.
#[derive(Debug, Clone, Default)]
pub struct LocalProcessBuilder;

impl LocalProcessBuilder {
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn shell_command(script: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(script);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            cmd
        }
    }
}

#[async_trait]
impl PlatformBuilder for LocalProcessBuilder {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn can_build(&self, request: &BuildRequest) -> bool {
        request.image.is_none()
    }

    async fn build(&self, request: BuildRequest) -> Result<BuildOutput> {
        let mut logs = Vec::new();

        for (index, script) in request.commands.iter().enumerate() {
            info!(
                target_id = %request.target,
                step = %request.step,
                index,
                "Running command"
            );

            let output = Self::shell_command(script)
                .current_dir(&request.working_dir)
                .envs(&request.env)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| Error::BuildFailed {
                    platform: request.target.clone(),
                    step: request.step,
                    message: format!("failed to spawn command {}: {}", index + 1, e),
                })?;

            for line in String::from_utf8_lossy(&output.stdout).lines() {
                debug!(target_id = %request.target, "{}", line);
                logs.push(LogLine::new(LogStream::Stdout, line));
            }
            for line in String::from_utf8_lossy(&output.stderr).lines() {
                debug!(target_id = %request.target, "{}", line);
                logs.push(LogLine::new(LogStream::Stderr, line));
            }

            if !output.status.success() {
                let tail = logs
                    .iter()
                    .rev()
                    .find(|l| l.stream == LogStream::Stderr)
                    .map(|l| format!(": {}", l.content))
                    .unwrap_or_default();
                return Err(Error::BuildFailed {
                    platform: request.target.clone(),
                    step: request.step,
                    message: format!(
                        "command {} exited with {}{}",
                        index + 1,
                        output
                            .status
                            .code()
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "signal".to_string()),
                        tail
                    ),
                });
            }
        }

        Ok(BuildOutput {
            paths: request.outputs.clone(),
            exit_code: Some(0),
            logs,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use launchpad_core::{PipelineStep, Platform, ResourceId};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    fn request(dir: &std::path::Path, commands: &[&str]) -> BuildRequest {
        BuildRequest {
            id: ResourceId::new(),
            target: "Linux".to_string(),
            platform: Platform::Linux,
            step: PipelineStep::Build,
            image: None,
            commands: commands.iter().map(|c| c.to_string()).collect(),
            working_dir: dir.to_path_buf(),
            env: HashMap::from([("GREETING".to_string(), "hello".to_string())]),
            outputs: vec![PathBuf::from("out.txt")],
            timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_runs_commands_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let builder = LocalProcessBuilder::new();

        let output = builder
            .build(request(dir.path(), &["echo $GREETING > out.txt", "cat out.txt"]))
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.paths, vec![PathBuf::from("out.txt")]);
        assert!(output.logs.iter().any(|l| l.content == "hello"));
        assert!(dir.path().join("out.txt").exists());
    }

    #[tokio::test]
    async fn test_failure_stops_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let builder = LocalProcessBuilder::new();

        let err = builder
            .build(request(
                dir.path(),
                &["echo broken >&2; exit 3", "touch out.txt"],
            ))
            .await
            .unwrap_err();

        match err {
            Error::BuildFailed { message, step, .. } => {
                assert_eq!(step, PipelineStep::Build);
                assert!(message.contains("exited with 3"));
                assert!(message.contains("broken"));
            }
            other => panic!("expected BuildFailed, got {:?}", other),
        }
        assert!(!dir.path().join("out.txt").exists());
    }

    #[tokio::test]
    async fn test_only_handles_imageless_targets() {
        let dir = tempfile::tempdir().unwrap();
        let builder = LocalProcessBuilder::new();
        let mut req = request(dir.path(), &["true"]);
        assert!(builder.can_build(&req).await);
        req.image = Some("ubuntu:22.04".to_string());
        assert!(!builder.can_build(&req).await);
    }
}
