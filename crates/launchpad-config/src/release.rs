//! Release configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use launchpad_core::pipeline::Trigger;
use launchpad_core::{MediaType, Platform, PlatformTarget, PostBuildStep, RetentionPolicy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the canonical version string lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSource {
    /// File path, relative to the source tree.
    pub path: PathBuf,
    /// Regex with one capture group; the defaults cover common layouts.
    pub pattern: Option<String>,
}

/// Upper bounds on every external call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timeouts {
    pub build: Duration,
    pub sign: Duration,
    pub package: Duration,
    /// Release-host API calls.
    pub host: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            build: Duration::from_secs(1800),
            sign: Duration::from_secs(300),
            package: Duration::from_secs(900),
            host: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PublishSettings {
    /// Upserts attempted before a conflict is surfaced.
    pub attempts: u32,
    pub prerelease: bool,
    pub draft: bool,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            prerelease: false,
            draft: false,
        }
    }
}

/// The full release configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Product name used in artifact names.
    pub product: String,
    /// `owner/repo` on the release host.
    pub repository: Option<String>,
    pub version_source: VersionSource,
    pub triggers: Vec<Trigger>,
    pub retention: RetentionPolicy,
    pub timeouts: Timeouts,
    pub publish: PublishSettings,
    /// Signing command per platform; see `CommandSigner` for the variables it receives.
    pub signing: BTreeMap<Platform, String>,
    pub targets: Vec<PlatformTarget>,
}

impl ReleaseConfig {
    pub fn target(&self, id: &str) -> Option<&PlatformTarget> {
        self.targets.iter().find(|t| t.id == id)
    }

    /// Required media types per target id.
    pub fn required_classes(&self) -> BTreeMap<String, BTreeSet<MediaType>> {
        self.targets
            .iter()
            .map(|t| (t.id.clone(), t.required.clone()))
            .collect()
    }
}

/// Read and parse a release configuration file.
pub fn load(path: impl AsRef<Path>) -> ConfigResult<ReleaseConfig> {
    let content = std::fs::read_to_string(path.as_ref())?;
    parse_release_config(&content)
}

/// Parse a release configuration from KDL text.
pub fn parse_release_config(kdl: &str) -> ConfigResult<ReleaseConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut product = None;
    let mut repository = None;
    let mut version_source = None;
    let mut triggers = Vec::new();
    let mut retention = RetentionPolicy::default();
    let mut timeouts = Timeouts::default();
    let mut publish = PublishSettings::default();
    let mut signing = BTreeMap::new();
    let mut targets = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "product" => {
                product = Some(
                    get_first_string_arg(node)
                        .ok_or_else(|| ConfigError::MissingField("product name".to_string()))?,
                );
            }
            "repository" => {
                repository = get_first_string_arg(node);
            }
            "version-source" => {
                let path = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("version-source path".to_string()))?;
                version_source = Some(VersionSource {
                    path: PathBuf::from(path),
                    pattern: get_string_prop(node, "pattern"),
                });
            }
            "on" => {
                triggers.push(parse_trigger(node)?);
            }
            "retention" => {
                if let Some(keep) = get_uint_prop(node, "keep")? {
                    retention = RetentionPolicy::keep_last(keep as usize)
                        .map_err(|e| ConfigError::invalid("retention keep", e.to_string()))?;
                }
            }
            "timeouts" => {
                timeouts = parse_timeouts(node)?;
            }
            "publish" => {
                if let Some(attempts) = get_uint_prop(node, "attempts")? {
                    if attempts == 0 {
                        return Err(ConfigError::invalid(
                            "publish attempts",
                            "must be at least 1",
                        ));
                    }
                    publish.attempts = attempts as u32;
                }
                if let Some(prerelease) = get_bool_prop(node, "prerelease") {
                    publish.prerelease = prerelease;
                }
                if let Some(draft) = get_bool_prop(node, "draft") {
                    publish.draft = draft;
                }
            }
            "signing" => {
                let (platform, command) = parse_signing(node)?;
                if signing.insert(platform, command).is_some() {
                    return Err(ConfigError::Duplicate(format!("signing for {}", platform)));
                }
            }
            "target" => {
                targets.push(parse_target(node)?);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    let product = product.ok_or_else(|| ConfigError::MissingField("product".to_string()))?;
    let version_source = version_source
        .ok_or_else(|| ConfigError::MissingField("version-source".to_string()))?;

    if targets.is_empty() {
        return Err(ConfigError::MissingField("at least one target".to_string()));
    }

    let mut seen = HashSet::new();
    for target in &targets {
        if !seen.insert(target.id.as_str()) {
            return Err(ConfigError::Duplicate(format!("target '{}'", target.id)));
        }
    }

    for target in &targets {
        let signs = target.has_step(PostBuildStep::Sign)
            || target.has_step(PostBuildStep::SignInstaller);
        if signs && !signing.contains_key(&target.platform) {
            return Err(ConfigError::invalid(
                format!("target '{}' steps", target.id),
                format!("no signing command configured for {}", target.platform),
            ));
        }
    }

    if triggers.is_empty() {
        triggers.push(Trigger::Manual);
    }

    Ok(ReleaseConfig {
        product,
        repository,
        version_source,
        triggers,
        retention,
        timeouts,
        publish,
        signing,
        targets,
    })
}

fn parse_signing(node: &KdlNode) -> ConfigResult<(Platform, String)> {
    let platform: Platform = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("signing platform".to_string()))?
        .parse()
        .map_err(|e: launchpad_core::Error| ConfigError::invalid("signing platform", e.to_string()))?;
    let command = get_string_prop(node, "command")
        .ok_or_else(|| ConfigError::MissingField(format!("signing command for {}", platform)))?;
    Ok((platform, command))
}

fn parse_trigger(node: &KdlNode) -> ConfigResult<Trigger> {
    let trigger_type = get_first_string_arg(node).unwrap_or_default();

    match trigger_type.as_str() {
        "push" => {
            let branches = get_string_list_prop(node, "branches");
            Ok(Trigger::Push {
                branches: if branches.is_empty() {
                    vec!["*".to_string()]
                } else {
                    branches
                },
            })
        }
        "schedule" => {
            let cron = get_string_prop(node, "cron")
                .ok_or_else(|| ConfigError::MissingField("schedule cron".to_string()))?;
            Ok(Trigger::Schedule { cron })
        }
        "manual" | "" => Ok(Trigger::Manual),
        _ => Err(ConfigError::invalid(
            "trigger type",
            format!("unknown trigger type: {}", trigger_type),
        )),
    }
}

fn parse_timeouts(node: &KdlNode) -> ConfigResult<Timeouts> {
    let mut timeouts = Timeouts::default();
    let fields: [(&str, &mut Duration); 4] = [
        ("build", &mut timeouts.build),
        ("sign", &mut timeouts.sign),
        ("package", &mut timeouts.package),
        ("host", &mut timeouts.host),
    ];
    for (name, slot) in fields {
        if let Some(secs) = get_uint_prop(node, name)? {
            if secs == 0 {
                return Err(ConfigError::invalid(
                    format!("timeouts {}", name),
                    "must be greater than zero",
                ));
            }
            *slot = Duration::from_secs(secs);
        }
    }
    Ok(timeouts)
}

fn parse_target(node: &KdlNode) -> ConfigResult<PlatformTarget> {
    let id = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("target name".to_string()))?;

    let platform: Platform = get_string_prop(node, "platform")
        .ok_or_else(|| ConfigError::MissingField(format!("platform for target '{}'", id)))?
        .parse()
        .map_err(|e: launchpad_core::Error| {
            ConfigError::invalid(format!("target '{}' platform", id), e.to_string())
        })?;

    let mut image = get_string_prop(node, "image");
    let mut build = Vec::new();
    let mut output = None;
    let mut dependencies = Vec::new();
    let mut steps = Vec::new();
    let mut package = Vec::new();
    let mut package_output = None;
    let mut archive = Vec::new();
    let mut required = BTreeSet::new();
    let mut env = HashMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "image" => {
                    image = get_first_string_arg(child);
                }
                "build" => {
                    if let Some(cmd) = get_first_string_arg(child) {
                        build.push(cmd);
                    }
                }
                "output" => {
                    output = get_first_string_arg(child);
                }
                "dependencies" => {
                    dependencies.extend(get_all_string_args(child));
                }
                "steps" => {
                    for name in get_all_string_args(child) {
                        let step: PostBuildStep = name.parse().map_err(|e: launchpad_core::Error| {
                            ConfigError::invalid(format!("target '{}' steps", id), e.to_string())
                        })?;
                        steps.push(step);
                    }
                }
                "package" => {
                    if let Some(cmd) = get_first_string_arg(child) {
                        package.push(cmd);
                    }
                }
                "package-output" => {
                    package_output = get_first_string_arg(child);
                }
                "archive" => {
                    if let Some(cmd) = get_first_string_arg(child) {
                        archive.push(cmd);
                    }
                }
                "requires" => {
                    for name in get_all_string_args(child) {
                        let media: MediaType = name.parse().map_err(|e: launchpad_core::Error| {
                            ConfigError::invalid(format!("target '{}' requires", id), e.to_string())
                        })?;
                        required.insert(media);
                    }
                }
                "env" => {
                    if let Some(grandchildren) = child.children() {
                        for gc in grandchildren.nodes() {
                            let key = gc.name().value().to_string();
                            if let Some(val) = get_first_string_arg(gc) {
                                env.insert(key, val);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    if build.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "build command for target '{}'",
            id
        )));
    }
    let output =
        output.ok_or_else(|| ConfigError::MissingField(format!("output for target '{}'", id)))?;

    let mut target = PlatformTarget {
        id,
        platform,
        image,
        build,
        output,
        dependencies,
        steps,
        package,
        package_output,
        archive,
        required,
        env,
    };
    validate_target(&mut target)?;
    Ok(target)
}

/// Check step ordering and required classes; default `required` to everything producible.
fn validate_target(target: &mut PlatformTarget) -> ConfigResult<()> {
    let field = format!("target '{}' steps", target.id);

    for pair in target.steps.windows(2) {
        if pair[0] >= pair[1] {
            return Err(ConfigError::invalid(
                field,
                "steps must be unique and ordered: sign, package, sign-installer, archive",
            ));
        }
    }

    if target.platform == Platform::MacOs && !target.has_step(PostBuildStep::Archive) {
        return Err(ConfigError::invalid(
            field,
            "macos app bundles are published through the archive step",
        ));
    }

    let packages = target.has_step(PostBuildStep::Package);
    if target.has_step(PostBuildStep::SignInstaller) && !packages {
        return Err(ConfigError::invalid(field, "sign-installer requires package"));
    }
    if packages && (target.package.is_empty() || target.package_output.is_none()) {
        return Err(ConfigError::invalid(
            field,
            "package step needs package commands and a package-output",
        ));
    }

    let producible = target.producible();
    if target.required.is_empty() {
        target.required = producible;
    } else if let Some(missing) = target.required.difference(&producible).next() {
        return Err(ConfigError::invalid(
            format!("target '{}' requires", target.id),
            format!("no configured step produces {}", missing),
        ));
    }
    Ok(())
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

fn get_uint_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    match node.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|i| u64::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| {
                ConfigError::invalid(
                    format!("{} {}", node.name().value(), name),
                    "expected a non-negative integer",
                )
            }),
    }
}

fn get_string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    let mut result = Vec::new();

    // Repeated properties: branches="main" branches="release"
    for entry in node.entries() {
        if let Some(entry_name) = entry.name() {
            if entry_name.value() == name {
                if let Some(s) = entry.value().as_string() {
                    result.push(s.to_string());
                }
            }
        }
    }

    if !result.is_empty() {
        return result;
    }

    // Block syntax
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == name {
                return get_all_string_args(child);
            }
        }
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        product "EdgeNodeLauncher"
        repository "Ratio1/edge_node_launcher"
        version-source "ver.py"

        on "push" branches="main"
        on "manual"
        on "schedule" cron="0 3 * * *"

        retention keep=5
        timeouts build=600 sign=60
        publish attempts=4

        signing "windows" command="signtool sign /f ${secrets.CERT} /p ${secrets.PASSWORD} ${step.output}"

        target "Windows" platform="windows" {
            build "pyinstaller -w main.spec"
            output "dist/EdgeNodeLauncher.exe"
            dependencies "pyinstaller" "pyqt5"
            steps "sign" "package" "sign-installer"
            package "iscc installer.iss"
            package-output "dist/setup.exe"
            requires "executable" "installer"
        }

        target "Ubuntu-22.04" platform="linux" image="ubuntu:22.04" {
            build "pyinstaller main.spec"
            output "dist/EdgeNodeLauncher"
            steps "archive"
            env {
                DEBIAN_FRONTEND "noninteractive"
            }
        }
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = parse_release_config(FULL).unwrap();
        assert_eq!(config.product, "EdgeNodeLauncher");
        assert_eq!(config.repository.as_deref(), Some("Ratio1/edge_node_launcher"));
        assert_eq!(config.version_source.path, PathBuf::from("ver.py"));
        assert_eq!(config.triggers.len(), 3);
        assert_eq!(config.retention.keep_count, 5);
        assert_eq!(config.timeouts.build, Duration::from_secs(600));
        assert_eq!(config.timeouts.sign, Duration::from_secs(60));
        assert_eq!(config.timeouts.host, Timeouts::default().host);
        assert_eq!(config.publish.attempts, 4);
        assert!(config.signing[&Platform::Windows].starts_with("signtool sign"));
        assert_eq!(config.targets.len(), 2);

        let windows = config.target("Windows").unwrap();
        assert_eq!(windows.platform, Platform::Windows);
        assert_eq!(
            windows.steps,
            vec![
                PostBuildStep::Sign,
                PostBuildStep::Package,
                PostBuildStep::SignInstaller
            ]
        );
        assert_eq!(windows.dependencies, vec!["pyinstaller", "pyqt5"]);

        let linux = config.target("Ubuntu-22.04").unwrap();
        assert_eq!(linux.image.as_deref(), Some("ubuntu:22.04"));
        assert_eq!(
            linux.env.get("DEBIAN_FRONTEND").map(String::as_str),
            Some("noninteractive")
        );
    }

    #[test]
    fn test_required_defaults_to_producible() {
        let config = parse_release_config(FULL).unwrap();
        let required = config.required_classes();
        assert_eq!(
            required["Ubuntu-22.04"],
            BTreeSet::from([MediaType::Executable, MediaType::Archive])
        );
        assert_eq!(
            required["Windows"],
            BTreeSet::from([MediaType::Executable, MediaType::Installer])
        );
    }

    #[test]
    fn test_missing_product() {
        let kdl = r#"
            version-source "ver.py"
            target "Linux" platform="linux" {
                build "make"
                output "dist/app"
            }
        "#;
        assert!(matches!(
            parse_release_config(kdl).unwrap_err(),
            ConfigError::MissingField(_)
        ));
    }

    #[test]
    fn test_duplicate_target() {
        let kdl = r#"
            product "App"
            version-source "ver.py"
            target "Linux" platform="linux" {
                build "make"
                output "dist/app"
            }
            target "Linux" platform="linux" {
                build "make"
                output "dist/app"
            }
        "#;
        assert!(matches!(
            parse_release_config(kdl).unwrap_err(),
            ConfigError::Duplicate(_)
        ));
    }

    #[test]
    fn test_out_of_order_steps_rejected() {
        let kdl = r#"
            product "App"
            version-source "ver.py"
            target "Linux" platform="linux" {
                build "make"
                output "dist/app"
                steps "archive" "sign"
            }
        "#;
        assert!(matches!(
            parse_release_config(kdl).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_sign_installer_requires_package() {
        let kdl = r#"
            product "App"
            version-source "ver.py"
            target "Windows" platform="windows" {
                build "make"
                output "dist/app.exe"
                steps "sign" "sign-installer"
            }
        "#;
        let err = parse_release_config(kdl).unwrap_err();
        assert!(err.to_string().contains("sign-installer requires package"));
    }

    #[test]
    fn test_unproducible_requirement_rejected() {
        let kdl = r#"
            product "App"
            version-source "ver.py"
            target "Linux" platform="linux" {
                build "make"
                output "dist/app"
                requires "installer"
            }
        "#;
        let err = parse_release_config(kdl).unwrap_err();
        assert!(err.to_string().contains("no configured step produces installer"));
    }

    #[test]
    fn test_macos_requires_archive() {
        let kdl = r#"
            product "App"
            version-source "ver.py"
            target "macOS" platform="macos" {
                build "pyinstaller main.spec"
                output "dist/App.app"
                steps "sign"
            }
        "#;
        let err = parse_release_config(kdl).unwrap_err();
        assert!(err.to_string().contains("archive step"));
    }

    #[test]
    fn test_signing_command_required() {
        let kdl = r#"
            product "App"
            version-source "ver.py"
            target "Windows" platform="windows" {
                build "make"
                output "dist/app.exe"
                steps "sign"
            }
        "#;
        let err = parse_release_config(kdl).unwrap_err();
        assert!(err.to_string().contains("no signing command configured for windows"));
    }

    #[test]
    fn test_unknown_platform() {
        let kdl = r#"
            product "App"
            version-source "ver.py"
            target "Amiga" platform="amigaos" {
                build "make"
                output "dist/app"
            }
        "#;
        assert!(parse_release_config(kdl).is_err());
    }

    #[test]
    fn test_zero_keep_rejected() {
        let kdl = r#"
            product "App"
            version-source "ver.py"
            retention keep=0
            target "Linux" platform="linux" {
                build "make"
                output "dist/app"
            }
        "#;
        assert!(parse_release_config(kdl).is_err());
    }

    #[test]
    fn test_defaults_to_manual_trigger() {
        let kdl = r#"
            product "App"
            version-source "ver.py"
            target "Linux" platform="linux" {
                build "make"
                output "dist/app"
            }
        "#;
        let config = parse_release_config(kdl).unwrap();
        assert_eq!(config.triggers, vec![Trigger::Manual]);
        assert_eq!(config.retention.keep_count, 10);
    }
}
