//! Platform targets and their post-build steps.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Closed set of runtime platforms. Each has its own build strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
        };
        f.write_str(s)
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "windows" | "win" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            "macos" | "darwin" | "osx" => Ok(Platform::MacOs),
            other => Err(Error::InvalidInput(format!("unknown platform: {}", other))),
        }
    }
}

/// Class of a produced file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Raw executable or application bundle straight out of the build.
    Executable,
    /// Installer, AppImage or similar distributable.
    Installer,
    /// Compressed archive.
    Archive,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaType::Executable => "executable",
            MediaType::Installer => "installer",
            MediaType::Archive => "archive",
        };
        f.write_str(s)
    }
}

impl FromStr for MediaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executable" | "binary" => Ok(MediaType::Executable),
            "installer" => Ok(MediaType::Installer),
            "archive" => Ok(MediaType::Archive),
            other => Err(Error::InvalidInput(format!("unknown media type: {}", other))),
        }
    }
}

/// Optional step after the build. The derived order is the canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostBuildStep {
    Sign,
    Package,
    SignInstaller,
    Archive,
}

impl FromStr for PostBuildStep {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sign" => Ok(PostBuildStep::Sign),
            "package" => Ok(PostBuildStep::Package),
            "sign-installer" => Ok(PostBuildStep::SignInstaller),
            "archive" => Ok(PostBuildStep::Archive),
            other => Err(Error::InvalidInput(format!("unknown step: {}", other))),
        }
    }
}

/// Position of a target in its build state machine, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStep {
    Build,
    Sign,
    Package,
    SignInstaller,
    Archive,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStep::Build => "build",
            PipelineStep::Sign => "sign",
            PipelineStep::Package => "package",
            PipelineStep::SignInstaller => "sign-installer",
            PipelineStep::Archive => "archive",
        };
        f.write_str(s)
    }
}

impl From<PostBuildStep> for PipelineStep {
    fn from(step: PostBuildStep) -> Self {
        match step {
            PostBuildStep::Sign => PipelineStep::Sign,
            PostBuildStep::Package => PipelineStep::Package,
            PostBuildStep::SignInstaller => PipelineStep::SignInstaller,
            PostBuildStep::Archive => PipelineStep::Archive,
        }
    }
}

/// One supported platform and its build/sign/package recipe.
///
/// Targets are static configuration and are never mutated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformTarget {
    /// Target identifier used in artifact names (e.g. "Windows", "Ubuntu-22.04").
    pub id: String,
    pub platform: Platform,
    /// Container image to build in. `None` builds on the host.
    pub image: Option<String>,
    /// Build commands, run in order.
    pub build: Vec<String>,
    /// Path of the raw build output, relative to the source tree.
    pub output: String,
    /// Packages the builder must have available before building.
    pub dependencies: Vec<String>,
    /// Post-build steps in canonical order.
    pub steps: Vec<PostBuildStep>,
    /// Commands producing the installer.
    pub package: Vec<String>,
    /// Path of the installer produced by `package`, relative to the source tree.
    pub package_output: Option<String>,
    /// Overrides the platform's default archive commands.
    pub archive: Vec<String>,
    /// Media types this target must contribute for a release to include it.
    pub required: BTreeSet<MediaType>,
    pub env: HashMap<String, String>,
}

impl PlatformTarget {
    pub fn has_step(&self, step: PostBuildStep) -> bool {
        self.steps.contains(&step)
    }

    /// Media types this target's configured steps can produce.
    pub fn producible(&self) -> BTreeSet<MediaType> {
        let mut types = BTreeSet::from([MediaType::Executable]);
        if self.has_step(PostBuildStep::Package) {
            types.insert(MediaType::Installer);
        }
        if self.has_step(PostBuildStep::Archive) {
            types.insert(MediaType::Archive);
        }
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parsing() {
        assert_eq!("windows".parse::<Platform>().unwrap(), Platform::Windows);
        assert_eq!("Darwin".parse::<Platform>().unwrap(), Platform::MacOs);
        assert!("beos".parse::<Platform>().is_err());
    }

    #[test]
    fn test_step_canonical_order() {
        let mut steps = vec![
            PostBuildStep::Archive,
            PostBuildStep::SignInstaller,
            PostBuildStep::Sign,
            PostBuildStep::Package,
        ];
        steps.sort();
        assert_eq!(
            steps,
            vec![
                PostBuildStep::Sign,
                PostBuildStep::Package,
                PostBuildStep::SignInstaller,
                PostBuildStep::Archive,
            ]
        );
    }

    #[test]
    fn test_producible_follows_steps() {
        let target = PlatformTarget {
            id: "Windows".to_string(),
            platform: Platform::Windows,
            image: None,
            build: vec!["pyinstaller app.spec".to_string()],
            output: "dist/app.exe".to_string(),
            dependencies: vec![],
            steps: vec![PostBuildStep::Sign, PostBuildStep::Package],
            package: vec!["iscc setup.iss".to_string()],
            package_output: Some("dist/setup.exe".to_string()),
            archive: vec![],
            required: BTreeSet::new(),
            env: HashMap::new(),
        };
        let types = target.producible();
        assert!(types.contains(&MediaType::Executable));
        assert!(types.contains(&MediaType::Installer));
        assert!(!types.contains(&MediaType::Archive));
    }
}
