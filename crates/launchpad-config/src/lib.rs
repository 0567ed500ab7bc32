//! KDL configuration parsing for launchpad.
//!
//! This crate handles:
//! - The release configuration (launchpad.kdl)
//! - Reading the declared version from its source file
//! - Variable interpolation in build commands

pub mod error;
pub mod release;
pub mod variables;
pub mod version_source;

pub use error::{ConfigError, ConfigResult};
pub use release::{PublishSettings, ReleaseConfig, Timeouts, VersionSource, load, parse_release_config};
pub use variables::{
    GitContext, ReleaseContext, StepContext, TargetContext, VariableContext,
    VariableContextBuilder,
};
pub use version_source::{extract_version, read_version};
