//! Build and signing backends for launchpad.
//!
//! Provides implementations of the collaborator traits:
//! - Local processes (targets without an image)
//! - Docker containers (targets with an image)
//! - Command-based signing

pub mod docker;
pub mod process;
pub mod signer;

pub use docker::DockerBuilder;
pub use launchpad_core::builder::{
    BuildOutput, BuildRequest, Credentials, LogLine, LogStream, PlatformBuilder, SigningService,
};
pub use process::LocalProcessBuilder;
pub use signer::{CommandSigner, signed_path};
