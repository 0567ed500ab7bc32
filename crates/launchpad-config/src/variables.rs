//! Variable interpolation for build, package and signing commands.
//!
//! Supports variables like:
//! - `${release.version}` - Declared version
//! - `${release.tag}` - Release tag (equal to the version)
//! - `${release.product}` - Product name
//! - `${git.sha}` - Full git commit SHA
//! - `${git.short_sha}` - Short (7 char) git commit SHA
//! - `${git.branch}` - Branch that triggered the run
//! - `${target.id}` - Target identifier
//! - `${target.platform}` - Target platform
//! - `${target.dependencies}` - Space-separated dependency packages
//! - `${step.input}` - File the current step consumes
//! - `${step.output}` - File the current step must produce
//! - `${env.VAR_NAME}` - Environment variable
//! - `${secrets.SECRET_NAME}` - Secret value
//! - `${date}` - ISO date (YYYY-MM-DD)

use launchpad_core::{PlatformTarget, Version};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub release: ReleaseContext,
    pub git: GitContext,
    pub target: TargetContext,
    pub step: StepContext,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Secrets (masked in logs)
    pub secrets: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReleaseContext {
    pub version: String,
    pub tag: String,
    pub product: String,
}

/// Git context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct GitContext {
    pub sha: String,
    pub short_sha: String,
    pub branch: String,
}

#[derive(Debug, Clone, Default)]
pub struct TargetContext {
    pub id: String,
    pub platform: String,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub input: String,
    pub output: String,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

const MASK: &str = "***";

impl VariableContext {
    /// Create a new empty variable context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate git context from environment variables (CI environment).
    pub fn populate_git_from_env(&mut self) {
        self.populate_git_from_vars(std::env::vars());
    }

    fn populate_git_from_vars(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| vars.get(*n).filter(|v| !v.is_empty()).cloned())
        };

        if let Some(sha) = first(&["LAUNCHPAD_COMMIT_SHA", "GITHUB_SHA", "GIT_COMMIT"]) {
            self.git.short_sha = sha.chars().take(7).collect();
            self.git.sha = sha;
        }
        if let Some(branch) = first(&["LAUNCHPAD_BRANCH", "GITHUB_REF_NAME", "GIT_BRANCH"]) {
            self.git.branch = branch;
        }
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    /// Scope the context to one target.
    pub fn for_target(&self, target: &PlatformTarget) -> Self {
        let mut ctx = self.clone();
        ctx.target = TargetContext {
            id: target.id.clone(),
            platform: target.platform.to_string(),
            dependencies: target.dependencies.clone(),
        };
        for (key, value) in &target.env {
            ctx.env.insert(key.clone(), value.clone());
        }
        ctx
    }

    /// Scope the context to one step's input and output files.
    pub fn for_step(&self, input: impl Into<String>, output: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.step = StepContext {
            input: input.into(),
            output: output.into(),
        };
        ctx
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["release", "version"] => Some(self.release.version.clone()),
            ["release", "tag"] => Some(self.release.tag.clone()),
            ["release", "product"] => Some(self.release.product.clone()),

            ["git", "sha"] => Some(self.git.sha.clone()),
            ["git", "short_sha"] => Some(self.git.short_sha.clone()),
            ["git", "branch"] => Some(self.git.branch.clone()),

            ["target", "id"] => Some(self.target.id.clone()),
            ["target", "platform"] => Some(self.target.platform.clone()),
            ["target", "dependencies"] => Some(self.target.dependencies.join(" ")),

            ["step", "input"] => Some(self.step.input.clone()),
            ["step", "output"] => Some(self.step.output.clone()),

            ["env", name] => self.env.get(*name).cloned(),
            ["secrets", name] => self.secrets.get(*name).cloned(),

            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    /// Unknown variables are left as written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Interpolate variables in a list of strings.
    pub fn interpolate_vec(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }

    /// Interpolate variables in a HashMap.
    pub fn interpolate_map(&self, map: &HashMap<String, String>) -> HashMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }

    /// Replace every secret value in `input`, for logging.
    pub fn mask(&self, input: &str) -> String {
        let mut secrets: Vec<&str> = self
            .secrets
            .values()
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        // Longest first so a secret containing another is masked whole.
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));

        let mut masked = input.to_string();
        for secret in secrets {
            masked = masked.replace(secret, MASK);
        }
        masked
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_release(mut self, product: impl Into<String>, version: &Version) -> Self {
        self.ctx.release = ReleaseContext {
            version: version.to_string(),
            tag: version.tag(),
            product: product.into(),
        };
        self
    }

    pub fn with_git_sha(mut self, sha: impl Into<String>) -> Self {
        let sha = sha.into();
        self.ctx.git.short_sha = sha.chars().take(7).collect();
        self.ctx.git.sha = sha;
        self
    }

    pub fn with_git_branch(mut self, branch: impl Into<String>) -> Self {
        self.ctx.git.branch = branch.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.secrets.insert(key.into(), value.into());
        self
    }

    pub fn with_secrets<'a>(mut self, secrets: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        for (key, value) in secrets {
            self.ctx.secrets.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_core::Platform;
    use std::collections::BTreeSet;

    fn target() -> PlatformTarget {
        PlatformTarget {
            id: "Ubuntu-22.04".to_string(),
            platform: Platform::Linux,
            image: None,
            build: vec!["pyinstaller main.spec".to_string()],
            output: "dist/app".to_string(),
            dependencies: vec!["libxcb1".to_string(), "libgl1".to_string()],
            steps: vec![],
            package: vec![],
            package_output: None,
            archive: vec![],
            required: BTreeSet::new(),
            env: HashMap::from([("QT_QPA_PLATFORM".to_string(), "offscreen".to_string())]),
        }
    }

    #[test]
    fn test_release_and_git_interpolation() {
        let version = Version::parse("1.4.0").unwrap();
        let ctx = VariableContextBuilder::new()
            .with_release("EdgeNodeLauncher", &version)
            .with_git_sha("abc1234567890")
            .with_git_branch("main")
            .build();

        let result = ctx.interpolate("${release.product} ${release.tag} from ${git.short_sha} on ${git.branch}");
        assert_eq!(result, "EdgeNodeLauncher 1.4.0 from abc1234 on main");
    }

    #[test]
    fn test_target_scope() {
        let ctx = VariableContext::new().for_target(&target());
        assert_eq!(
            ctx.interpolate("apt-get install -y ${target.dependencies}"),
            "apt-get install -y libxcb1 libgl1"
        );
        assert_eq!(ctx.interpolate("${target.platform}"), "linux");
        assert_eq!(ctx.interpolate("${env.QT_QPA_PLATFORM}"), "offscreen");
    }

    #[test]
    fn test_step_scope() {
        let ctx = VariableContext::new().for_step("dist/app.exe", "dist/app.signed.exe");
        assert_eq!(
            ctx.interpolate("signtool sign /fd sha256 ${step.output}"),
            "signtool sign /fd sha256 dist/app.signed.exe"
        );
    }

    #[test]
    fn test_unknown_variable_preserved() {
        let ctx = VariableContext::new();
        let result = ctx.interpolate("Unknown: ${unknown.var} ${secrets.MISSING}");
        assert_eq!(result, "Unknown: ${unknown.var} ${secrets.MISSING}");
    }

    #[test]
    fn test_mask_secrets() {
        let ctx = VariableContextBuilder::new()
            .with_secret("PASSWORD", "hunter2")
            .with_secret("PASSWORD_LONG", "hunter2hunter2")
            .build();

        let command = ctx.interpolate("sign -p ${secrets.PASSWORD_LONG} -q ${secrets.PASSWORD}");
        assert_eq!(ctx.mask(&command), "sign -p *** -q ***");
    }

    #[test]
    fn test_git_from_vars() {
        let mut ctx = VariableContext::new();
        ctx.populate_git_from_vars([
            ("GITHUB_SHA".to_string(), "0123456789abcdef".to_string()),
            ("GITHUB_REF_NAME".to_string(), "main".to_string()),
        ]);
        assert_eq!(ctx.git.short_sha, "0123456");
        assert_eq!(ctx.git.branch, "main");
    }

    #[test]
    fn test_interpolate_vec() {
        let ctx = VariableContextBuilder::new().with_git_branch("develop").build();

        let inputs = vec!["echo ${git.branch}".to_string(), "${date}".to_string()];
        let results = ctx.interpolate_vec(&inputs);
        assert_eq!(results[0], "echo develop");
        assert_eq!(results[1].len(), 10);
    }
}
