//! Command-based signing service.

use async_trait::async_trait;
use launchpad_config::VariableContextBuilder;
use launchpad_core::builder::{Credentials, SigningService};
use launchpad_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

use crate::process::LocalProcessBuilder;

/// Path of the signed copy of `input`: `<stem>.signed.<ext>` beside it.
pub fn signed_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}.signed.{}", stem, ext.to_string_lossy()),
        None => format!("{}.signed", stem),
    };
    input.with_file_name(name)
}

/// Signs a copy of the input by running a configured command on it.
///
/// The command sees `${step.input}` (the original), `${step.output}` (the copy)
/// and `${secrets.NAME}` for every credential.
#[derive(Debug, Clone)]
pub struct CommandSigner {
    command: String,
}

impl CommandSigner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl SigningService for CommandSigner {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn sign(&self, input: &Path, credentials: &Credentials) -> Result<PathBuf> {
        let metadata = tokio::fs::metadata(input).await.map_err(|e| Error::External {
            message: format!("cannot sign {}: {}", input.display(), e),
            transient: false,
        })?;
        let output = signed_path(input);

        // Retries start from a fresh copy.
        remove_path(&output).await?;
        if metadata.is_dir() {
            copy_tree(input.to_path_buf(), output.clone()).await?;
        } else {
            tokio::fs::copy(input, &output).await?;
        }

        let ctx = VariableContextBuilder::new()
            .with_secrets(credentials.iter())
            .build()
            .for_step(
                input.to_string_lossy().into_owned(),
                output.to_string_lossy().into_owned(),
            );
        let script = ctx.interpolate(&self.command);
        info!(file = %output.display(), command = %ctx.mask(&script), "Signing");

        let result = LocalProcessBuilder::shell_command(&script)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let failure = match result {
            Ok(out) if out.status.success() => None,
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                Some(format!(
                    "signing command exited with {}: {}",
                    out.status
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string()),
                    ctx.mask(stderr.trim())
                ))
            }
            Err(e) => Some(format!("failed to spawn signing command: {}", e)),
        };

        if let Some(message) = failure {
            // An unsigned copy must not be picked up later.
            remove_path(&output).await?;
            return Err(Error::External {
                message,
                transient: false,
            });
        }

        debug!(file = %output.display(), "Signed");
        Ok(output)
    }
}

async fn remove_path(path: &Path) -> Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await?,
        Ok(_) => tokio::fs::remove_file(path).await?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn copy_tree(from: PathBuf, to: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || copy_tree_blocking(&from, &to))
        .await
        .map_err(|e| Error::Internal(format!("copy task failed: {}", e)))?
        .map_err(Error::from)
}

fn copy_tree_blocking(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree_blocking(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
