//! Docker container builder for targets that declare an image.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use launchpad_core::builder::*;
use launchpad_core::{Error, ResourceId, Result};
use tracing::{debug, info, warn};

/// Mount point of the source tree inside build containers.
pub const WORKSPACE_MOUNT: &str = "/workspace";

async fn remove_container(docker: &Docker, container_name: &str) {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    if let Err(e) = docker.remove_container(container_name, Some(options)).await {
        warn!(container = %container_name, error = %e, "Failed to remove container");
    }
}

/// Force-removes its container when dropped before [`ContainerGuard::remove`]
/// ran, e.g. when the build future is cancelled by a timeout.
struct ContainerGuard {
    docker: Docker,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: Docker, name: String) -> Self {
        Self {
            docker,
            name,
            armed: true,
        }
    }

    async fn remove(mut self) {
        self.armed = false;
        remove_container(&self.docker, &self.name).await;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container = %self.name, "No runtime to remove abandoned container");
            return;
        };
        warn!(container = %self.name, "Build cancelled, removing container");
        let docker = self.docker.clone();
        let name = std::mem::take(&mut self.name);
        handle.spawn(async move { remove_container(&docker, &name).await });
    }
}

/// Runs a step's commands inside a throwaway container with the source tree bind-mounted.
pub struct DockerBuilder {
    docker: Docker,
}

impl DockerBuilder {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| Error::External {
            message: format!("failed to connect to docker: {}", e),
            transient: true,
        })?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn container_name(target: &str, id: &ResourceId) -> String {
        let target: String = target
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        format!("launchpad-{}-{}", target, id.short())
    }

    fn script(commands: &[String]) -> String {
        commands.join(" && ")
    }

    async fn pull(&self, image: &str) {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Pull warning");
                }
            }
        }
    }

    async fn collect_logs(&self, container_name: &str) -> Vec<LogLine> {
        let options = LogsOptions::<String> {
            follow: false,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_name, Some(options));
        let mut lines = Vec::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(output) => {
                    let (kind, message) = match output {
                        LogOutput::StdErr { message } => (LogStream::Stderr, message),
                        LogOutput::StdOut { message }
                        | LogOutput::Console { message }
                        | LogOutput::StdIn { message } => (LogStream::Stdout, message),
                    };
                    for line in String::from_utf8_lossy(&message).lines() {
                        lines.push(LogLine::new(kind, line.trim_end()));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Log stream error");
                    break;
                }
            }
        }
        lines
    }

    async fn run(&self, request: &BuildRequest, container_name: &str) -> Result<Option<i64>> {
        let image = request
            .image
            .clone()
            .ok_or_else(|| Error::InvalidInput(format!("target {} has no image", request.target)))?;
        let failed = |message: String| Error::BuildFailed {
            platform: request.target.clone(),
            step: request.step,
            message,
        };

        self.pull(&image).await;

        let env: Vec<String> = request
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                request.working_dir.display(),
                WORKSPACE_MOUNT
            )]),
            ..Default::default()
        };

        let config = Config {
            image: Some(image),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                Self::script(&request.commands),
            ]),
            env: Some(env),
            working_dir: Some(WORKSPACE_MOUNT.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.to_string(),
            platform: None,
        };

        info!(container = %container_name, step = %request.step, "Creating container");
        self.docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| failed(format!("failed to create container: {}", e)))?;

        info!(container = %container_name, "Starting container");
        self.docker
            .start_container(container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| failed(format!("failed to start container: {}", e)))?;

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(container_name, Some(options));

        let next = tokio::time::timeout(request.timeout, stream.next())
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("{} {} in {}", request.target, request.step, container_name),
                after: request.timeout,
            })?;

        // Non-zero exits arrive as an error carrying the code.
        let exit_code = match next {
            Some(Ok(response)) => Some(response.status_code),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(e)) => {
                warn!(error = %e, "Wait error");
                None
            }
            None => None,
        };
        Ok(exit_code)
    }
}

#[async_trait]
impl PlatformBuilder for DockerBuilder {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn can_build(&self, request: &BuildRequest) -> bool {
        request.image.is_some() && self.docker.ping().await.is_ok()
    }

    async fn build(&self, request: BuildRequest) -> Result<BuildOutput> {
        let container_name = Self::container_name(&request.target, &request.id);

        let guard = ContainerGuard::new(self.docker.clone(), container_name.clone());

        let result = self.run(&request, &container_name).await;
        let logs = self.collect_logs(&container_name).await;
        guard.remove().await;

        let exit_code = result?;
        for line in &logs {
            debug!(target_id = %request.target, "{}", line.content);
        }

        match exit_code {
            Some(0) => Ok(BuildOutput {
                paths: request.outputs.clone(),
                exit_code: Some(0),
                logs,
            }),
            other => {
                let tail = logs
                    .iter()
                    .rev()
                    .find(|l| l.stream == LogStream::Stderr)
                    .map(|l| format!(": {}", l.content))
                    .unwrap_or_default();
                Err(Error::BuildFailed {
                    platform: request.target.clone(),
                    step: request.step,
                    message: format!(
                        "container exited with {}{}",
                        other
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "unknown status".to_string()),
                        tail
                    ),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_is_sanitised() {
        let id = ResourceId::new();
        let name = DockerBuilder::container_name("Ubuntu 22.04/x64", &id);
        assert!(name.starts_with("launchpad-ubuntu-22.04-x64-"));
        assert!(
            name.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        );
    }

    #[test]
    fn test_container_name_unique_per_id() {
        let a = DockerBuilder::container_name("Linux", &ResourceId::new());
        let b = DockerBuilder::container_name("Linux", &ResourceId::new());
        assert_ne!(a, b);
    }

    #[test]
    fn test_script_chains_commands() {
        let script = DockerBuilder::script(&["apt-get update".to_string(), "make".to_string()]);
        assert_eq!(script, "apt-get update && make");
    }
}

/// Integration tests that require Docker to be running.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use launchpad_core::{PipelineStep, Platform};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    fn request(dir: &std::path::Path, commands: &[&str]) -> BuildRequest {
        BuildRequest {
            id: ResourceId::new(),
            target: "Ubuntu-22.04".to_string(),
            platform: Platform::Linux,
            step: PipelineStep::Build,
            image: Some("alpine:latest".to_string()),
            commands: commands.iter().map(|c| c.to_string()).collect(),
            working_dir: dir.to_path_buf(),
            env: HashMap::from([("MY_VAR".to_string(), "hello_world".to_string())]),
            outputs: vec![PathBuf::from("out.txt")],
            timeout: Duration::from_secs(120),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_build_writes_to_mounted_tree() {
        let dir = tempfile::tempdir().unwrap();
        let builder = DockerBuilder::new().unwrap();

        let output = builder
            .build(request(dir.path(), &["echo $MY_VAR > out.txt", "cat out.txt"]))
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(0));
        assert!(output.logs.iter().any(|l| l.content.contains("hello_world")));
        assert!(dir.path().join("out.txt").exists());
    }

    async fn container_exists(name: &str) -> bool {
        let docker = Docker::connect_with_local_defaults().unwrap();
        docker.inspect_container(name, None).await.is_ok()
    }

    #[tokio::test]
    #[ignore]
    async fn test_step_timeout_removes_container() {
        let dir = tempfile::tempdir().unwrap();
        let builder = DockerBuilder::new().unwrap();
        let mut request = request(dir.path(), &["sleep 60"]);
        request.timeout = Duration::from_secs(2);
        let name = DockerBuilder::container_name(&request.target, &request.id);

        let err = builder.build(request).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(!container_exists(&name).await);
    }

    #[tokio::test]
    #[ignore]
    async fn test_cancelled_build_removes_container() {
        let dir = tempfile::tempdir().unwrap();
        let builder = DockerBuilder::new().unwrap();
        let request = request(dir.path(), &["sleep 60"]);
        let name = DockerBuilder::container_name(&request.target, &request.id);

        // Dropping the future mid-wait, as an outer timeout does.
        let outcome = tokio::time::timeout(Duration::from_secs(10), builder.build(request)).await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!container_exists(&name).await);
    }

    #[tokio::test]
    #[ignore]
    async fn test_failing_build() {
        let dir = tempfile::tempdir().unwrap();
        let builder = DockerBuilder::new().unwrap();

        let err = builder
            .build(request(dir.path(), &["exit 42"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with 42"));
    }
}
