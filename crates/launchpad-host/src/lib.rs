//! Release host clients for launchpad.
//!
//! - GitHub Releases (production)
//! - In-memory host (tests and dry runs)

pub mod error;
pub mod github;
pub mod memory;

pub use error::HostError;
pub use github::GitHubReleaseHost;
pub use launchpad_core::{Release, ReleaseAsset, ReleaseHost, ReleaseMetadata};
pub use memory::InMemoryReleaseHost;
