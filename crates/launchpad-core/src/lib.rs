//! Core domain types and traits for launchpad.
//!
//! This crate contains:
//! - Resource identifiers and the error taxonomy
//! - Versions and platform targets
//! - Artifacts and artifact sets
//! - Releases and the release-host trait
//! - Builder and signer collaborator traits
//! - Trigger types

pub mod artifact;
pub mod builder;
pub mod error;
pub mod id;
pub mod pipeline;
pub mod platform;
pub mod release;
pub mod version;

pub use artifact::{Artifact, ArtifactKey, ArtifactSet};
pub use error::{Error, Result};
pub use id::ResourceId;
pub use platform::{MediaType, PipelineStep, Platform, PlatformTarget, PostBuildStep};
pub use release::{Release, ReleaseAsset, ReleaseHost, ReleaseMetadata, RetentionPolicy};
pub use version::Version;
