//! Service lifecycle module
//!
//! Drives the privileged background bypass process through an explicit state
//! machine:
//!
//! ```text
//! Stopped --start--> Starting --ok--> Running
//!                    Starting --err-> Failed
//! Running --stop---> Stopping --ok--> Stopped
//!                    Stopping --err-> Failed
//! ```
//!
//! `Failed` is terminal until the caller explicitly retries; nothing here
//! retries on its own.

pub mod controller;

pub use controller::{ServiceCommands, ServiceController};

use crate::elevation::ElevationError;
use serde::Serialize;

/// Lifecycle state of the background bypass service.
///
/// Exactly one instance exists per process, owned by [`ServiceController`];
/// everyone else observes it through [`ServiceController::state`] or a
/// subscription channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Terminal until an explicit retry; carries the failing command's output
    Failed(String),
}

impl ServiceState {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Stopping)
    }

    /// Stable lowercase name for event payloads.
    pub fn name(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Failed(_) => "failed",
        }
    }
}

/// Service lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Service start failed: {command}: {stderr}")]
    Start { command: String, stderr: String },

    #[error("Service stop failed: {command}: {stderr}")]
    Stop { command: String, stderr: String },

    #[error("Service registration failed: {command}: {stderr}")]
    Background { command: String, stderr: String },

    #[error("Service is already running")]
    AlreadyRunning,

    #[error("A service transition is already in flight")]
    TransitionInFlight,

    #[error("No bypass strategy selected")]
    NoStrategy,

    #[error("Not authorized for privileged operations")]
    NotAuthorized,

    #[error(transparent)]
    Elevation(#[from] ElevationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(ServiceState::Running.is_running());
        assert!(!ServiceState::Stopped.is_running());
        assert!(ServiceState::Starting.is_transitioning());
        assert!(ServiceState::Stopping.is_transitioning());
        assert!(!ServiceState::Failed("x".to_string()).is_transitioning());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ServiceState::Stopped.name(), "stopped");
        assert_eq!(ServiceState::Failed("boom".to_string()).name(), "failed");
    }

    #[test]
    fn test_error_display_start() {
        let err = ServiceError::Start {
            command: "zapret-launch --qnum=200".to_string(),
            stderr: "queue busy".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Service start failed: zapret-launch --qnum=200: queue busy"
        );
    }

    #[test]
    fn test_error_display_elevation_is_transparent() {
        let err: ServiceError = ElevationError::InvalidCredential.into();
        assert_eq!(err.to_string(), "Invalid elevation credential");
    }
}
