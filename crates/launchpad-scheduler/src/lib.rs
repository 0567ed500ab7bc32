//! Release orchestration for launchpad.
//!
//! Gates a run on the declared version, builds every target in parallel,
//! collects and verifies the artifacts, publishes the release and prunes old
//! ones.

pub mod checksum;
pub mod collector;
pub mod gate;
pub mod orchestrator;
pub mod pipeline;
pub mod publisher;
pub mod retention;
pub mod strategy;
pub mod timeout;

pub use collector::{ArtifactCollector, Collection};
pub use gate::{GateDecision, VersionGate, check_gate, check_releases};
pub use orchestrator::{
    BuildEvent, BuildOrchestrator, FailureKind, PlatformFailure, PlatformResult,
};
pub use pipeline::{ReleasePipeline, RunOutcome, RunReport, exit_code_for};
pub use publisher::{ReleasePublisher, release_notes};
pub use retention::{ItemStatus, PruneItem, PruneReport, RetentionManager, RetentionWorker};
pub use strategy::{PlatformStrategy, StepAction, StepPlan, strategy_for};
