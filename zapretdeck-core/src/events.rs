//! Core-to-UI event payloads
//!
//! The core reports structured outcomes; mapping them to user-facing text is
//! the frontend's job.

use crate::discovery::DiscoveryEvent;
use crate::service::ServiceState;
use crate::updater::UpdateInfo;
use serde::Serialize;

// Event name constants
pub const SERVICE_STATE_CHANGED: &str = "service-state-changed";
pub const DISCOVERY_PROGRESS: &str = "discovery-progress";
pub const UPDATE_AVAILABLE: &str = "update-available";

/// Service state change event payload
#[derive(Clone, Serialize)]
pub struct ServiceStateEvent {
    pub state: String,
    pub error: Option<String>,
}

impl From<&ServiceState> for ServiceStateEvent {
    fn from(state: &ServiceState) -> Self {
        Self {
            state: state.name().to_string(),
            error: match state {
                ServiceState::Failed(msg) => Some(msg.clone()),
                _ => None,
            },
        }
    }
}

/// Discovery progress event payload
#[derive(Clone, Serialize)]
pub struct DiscoveryProgressEvent {
    pub phase: String,
    pub strategy: Option<String>,
    pub index: Option<usize>,
    pub total: Option<usize>,
    pub error: Option<String>,
}

impl From<&DiscoveryEvent> for DiscoveryProgressEvent {
    fn from(event: &DiscoveryEvent) -> Self {
        match event {
            DiscoveryEvent::Testing { id, index, total } => Self {
                phase: "testing".to_string(),
                strategy: Some(id.clone()),
                index: Some(*index),
                total: Some(*total),
                error: None,
            },
            DiscoveryEvent::Found { id } => Self {
                phase: "found".to_string(),
                strategy: Some(id.clone()),
                index: None,
                total: None,
                error: None,
            },
            DiscoveryEvent::Exhausted => Self {
                phase: "exhausted".to_string(),
                strategy: None,
                index: None,
                total: None,
                error: None,
            },
            DiscoveryEvent::Cancelled => Self {
                phase: "cancelled".to_string(),
                strategy: None,
                index: None,
                total: None,
                error: None,
            },
            DiscoveryEvent::Error(msg) => Self {
                phase: "error".to_string(),
                strategy: None,
                index: None,
                total: None,
                error: Some(msg.clone()),
            },
        }
    }
}

/// Update banner event payload
#[derive(Clone, Serialize)]
pub struct UpdateAvailableEvent {
    pub version: String,
    pub html_url: String,
}

impl From<&UpdateInfo> for UpdateAvailableEvent {
    fn from(info: &UpdateInfo) -> Self {
        Self {
            version: info.version.clone(),
            html_url: info.html_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_state_event_carries_failure_text() {
        let event = ServiceStateEvent::from(&ServiceState::Failed("queue busy".to_string()));
        assert_eq!(event.state, "failed");
        assert_eq!(event.error.as_deref(), Some("queue busy"));

        let event = ServiceStateEvent::from(&ServiceState::Running);
        assert_eq!(event.state, "running");
        assert!(event.error.is_none());
    }

    #[test]
    fn test_discovery_event_mapping() {
        let event = DiscoveryProgressEvent::from(&DiscoveryEvent::Testing {
            id: "general".to_string(),
            index: 1,
            total: 4,
        });
        assert_eq!(event.phase, "testing");
        assert_eq!(event.strategy.as_deref(), Some("general"));
        assert_eq!(event.index, Some(1));
        assert_eq!(event.total, Some(4));

        let event = DiscoveryProgressEvent::from(&DiscoveryEvent::Exhausted);
        assert_eq!(event.phase, "exhausted");
        assert!(event.strategy.is_none());
    }

    #[test]
    fn test_events_serialize() {
        let event = ServiceStateEvent::from(&ServiceState::Stopped);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"stopped\""));
    }
}
