//! Strategy auto-discovery
//!
//! Searches the candidate pool for a strategy that restores connectivity to
//! the probe targets. Probing runs as a background task reporting progress
//! over a channel; cancellation is cooperative and takes effect between
//! candidates, never mid-target.

pub mod coordinator;
pub mod probe;

pub use coordinator::{DiscoveryCoordinator, DiscoveryEvent};
pub use probe::{HttpProbe, ProbeFailure, ProbeOutcome, ProbeTarget, StrategyProbe};

/// Discovery orchestration errors
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Discovery is already in progress")]
    AlreadyRunning,

    #[error("The candidate pool is empty")]
    EmptyPool,

    #[error("Failed to select discovered strategy: {0}")]
    Selection(String),

    #[error("Failed to restart with discovered strategy: {0}")]
    Restart(String),
}
