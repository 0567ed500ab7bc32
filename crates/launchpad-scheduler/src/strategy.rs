//! Per-platform build strategies.
//!
//! Every platform runs the same build, sign, package, sign-installer, archive
//! skeleton. A strategy decides what each step produces on its platform: the
//! file extensions, and how the default archive is made.

use launchpad_core::{MediaType, PipelineStep, Platform, PlatformTarget, PostBuildStep};
use std::path::{Path, PathBuf};

/// What a planned step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Run commands through a builder, producing `output` into the `produces` slot.
    Run {
        commands: Vec<String>,
        /// Slot whose current file is passed as `${step.input}`.
        input: Option<MediaType>,
        /// Relative to the source tree.
        output: PathBuf,
        produces: MediaType,
    },
    /// Replace the file in `slot` with a signed copy.
    Sign { slot: MediaType },
}

/// One step of a target's plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    pub step: PipelineStep,
    pub action: StepAction,
}

/// Platform-specific decisions for a target's pipeline.
pub trait PlatformStrategy: Send + Sync {
    fn platform(&self) -> Platform;

    /// Published file extension for a media type; empty for none.
    fn extension(&self, media_type: MediaType) -> &'static str;

    /// Archive commands used when the target does not configure its own.
    fn default_archive(&self) -> Vec<String>;

    /// Where the archive is written, relative to the source tree.
    fn archive_output(&self, target: &PlatformTarget) -> PathBuf {
        let dir = Path::new(&target.output)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        dir.join(format!(
            "{}.{}",
            target.id,
            self.extension(MediaType::Archive)
        ))
    }

    /// The ordered steps for `target`.
    fn plan(&self, target: &PlatformTarget) -> Vec<StepPlan> {
        let mut plan = vec![StepPlan {
            step: PipelineStep::Build,
            action: StepAction::Run {
                commands: target.build.clone(),
                input: None,
                output: PathBuf::from(&target.output),
                produces: MediaType::Executable,
            },
        }];

        for step in &target.steps {
            let action = match step {
                PostBuildStep::Sign => StepAction::Sign {
                    slot: MediaType::Executable,
                },
                PostBuildStep::Package => StepAction::Run {
                    commands: target.package.clone(),
                    input: Some(MediaType::Executable),
                    output: target
                        .package_output
                        .as_deref()
                        .map(PathBuf::from)
                        .unwrap_or_default(),
                    produces: MediaType::Installer,
                },
                PostBuildStep::SignInstaller => StepAction::Sign {
                    slot: MediaType::Installer,
                },
                PostBuildStep::Archive => StepAction::Run {
                    commands: if target.archive.is_empty() {
                        self.default_archive()
                    } else {
                        target.archive.clone()
                    },
                    input: Some(MediaType::Executable),
                    output: self.archive_output(target),
                    produces: MediaType::Archive,
                },
            };
            plan.push(StepPlan {
                step: (*step).into(),
                action,
            });
        }
        plan
    }
}

/// Raw `.exe`, a `setup.exe` installer and a zip archive.
pub struct WindowsStrategy;

impl PlatformStrategy for WindowsStrategy {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn extension(&self, media_type: MediaType) -> &'static str {
        match media_type {
            MediaType::Executable => "exe",
            MediaType::Installer => "setup.exe",
            MediaType::Archive => "zip",
        }
    }

    fn default_archive(&self) -> Vec<String> {
        vec![
            "powershell -NoProfile -Command \"Compress-Archive -Force -Path '${step.input}' -DestinationPath '${step.output}'\""
                .to_string(),
        ]
    }
}

/// Extensionless binary, an AppImage and a gzipped tarball.
pub struct LinuxStrategy;

impl PlatformStrategy for LinuxStrategy {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn extension(&self, media_type: MediaType) -> &'static str {
        match media_type {
            MediaType::Executable => "",
            MediaType::Installer => "AppImage",
            MediaType::Archive => "tar.gz",
        }
    }

    fn default_archive(&self) -> Vec<String> {
        vec![
            "tar -czf \"${step.output}\" -C \"$(dirname \"${step.input}\")\" \"$(basename \"${step.input}\")\""
                .to_string(),
        ]
    }
}

/// `.app` bundle, a disk image and a zip of the bundle.
pub struct MacOsStrategy;

impl PlatformStrategy for MacOsStrategy {
    fn platform(&self) -> Platform {
        Platform::MacOs
    }

    fn extension(&self, media_type: MediaType) -> &'static str {
        match media_type {
            MediaType::Executable => "app",
            MediaType::Installer => "dmg",
            MediaType::Archive => "zip",
        }
    }

    fn default_archive(&self) -> Vec<String> {
        vec!["ditto -c -k --keepParent \"${step.input}\" \"${step.output}\"".to_string()]
    }
}

/// The strategy for a platform.
pub fn strategy_for(platform: Platform) -> &'static dyn PlatformStrategy {
    match platform {
        Platform::Windows => &WindowsStrategy,
        Platform::Linux => &LinuxStrategy,
        Platform::MacOs => &MacOsStrategy,
    }
}
