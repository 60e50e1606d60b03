//! Types for the update checker

use serde::{Deserialize, Serialize};

/// Current state of the update check
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateState {
    /// No update activity
    Idle,
    /// Checking for updates
    Checking,
    /// Update available
    Available(UpdateInfo),
    /// No update available (already on latest)
    UpToDate,
    /// Update check failed; non-fatal, surfaced as "no update info"
    Failed(String),
}

impl UpdateState {
    /// Returns true if an update is available
    pub fn has_update(&self) -> bool {
        matches!(self, UpdateState::Available(_))
    }

    /// Returns the update info if available
    pub fn get_info(&self) -> Option<&UpdateInfo> {
        match self {
            UpdateState::Available(info) => Some(info),
            _ => None,
        }
    }
}

/// Information about an available update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateInfo {
    /// New version string
    pub version: String,
    /// Release page URL
    pub html_url: String,
    /// Release notes body
    pub release_notes: Option<String>,
    /// Publication timestamp as reported by GitHub
    pub published_at: Option<String>,
}

/// User settings for update checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// Check for updates automatically on startup
    #[serde(default = "default_auto_check")]
    pub auto_check: bool,
    /// Last time we checked for updates (Unix timestamp)
    #[serde(default)]
    pub last_check: Option<i64>,
    /// Version that user dismissed (won't show banner for this version)
    #[serde(default)]
    pub dismissed_version: Option<String>,
}

fn default_auto_check() -> bool {
    true
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            auto_check: true,
            last_check: None,
            dismissed_version: None,
        }
    }
}

/// Subset of the GitHub release API response
#[derive(Debug, Clone, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    pub html_url: String,
    pub body: Option<String>,
    pub published_at: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_state_has_update() {
        assert!(!UpdateState::Idle.has_update());
        assert!(!UpdateState::Checking.has_update());
        assert!(!UpdateState::UpToDate.has_update());
        assert!(!UpdateState::Failed("test".to_string()).has_update());

        let info = UpdateInfo {
            version: "0.2.0".to_string(),
            html_url: "https://example.com".to_string(),
            release_notes: None,
            published_at: None,
        };
        assert!(UpdateState::Available(info).has_update());
    }

    #[test]
    fn test_default_settings() {
        let settings = UpdateSettings::default();
        assert!(settings.auto_check);
        assert!(settings.last_check.is_none());
        assert!(settings.dismissed_version.is_none());
    }

    #[test]
    fn test_github_release_deserializes() {
        let json = r#"{
            "tag_name": "v0.1.8",
            "html_url": "https://github.com/rosakodu/zapretdeck/releases/tag/v0.1.8",
            "body": "Fixes",
            "published_at": "2025-11-02T10:00:00Z"
        }"#;
        let release: GithubRelease = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag_name, "v0.1.8");
        assert!(!release.prerelease);
    }
}
