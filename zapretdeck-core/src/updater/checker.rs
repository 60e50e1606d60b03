//! Update checker - fetches GitHub releases and compares versions

use super::types::{GithubRelease, UpdateInfo};
use crate::utils::with_retry;
use log::{debug, error, info};
use semver::Version;
use std::time::Duration;

/// GitHub repository for ZapretDeck releases
const GITHUB_REPO: &str = "rosakodu/zapretdeck";

/// Update checker that queries the GitHub releases API
pub struct UpdateChecker {
    client: reqwest::Client,
    current_version: Version,
}

impl UpdateChecker {
    /// Create a new update checker with the current app version
    /// Returns None if the version string cannot be parsed (prevents update loops)
    pub fn new() -> Option<Self> {
        Self::with_current_version(env!("CARGO_PKG_VERSION"))
    }

    /// Create a checker for an explicit local version (tests, frontends with
    /// their own version scheme)
    pub fn with_current_version(version_str: &str) -> Option<Self> {
        let current_version = match Version::parse(version_str.trim_start_matches('v')) {
            Ok(v) => v,
            Err(e) => {
                error!(
                    "Failed to parse current version '{}': {}. Disabling update checks.",
                    version_str, e
                );
                return None;
            }
        };

        Some(Self {
            client: reqwest::Client::builder()
                .user_agent("ZapretDeck-Updater")
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            current_version,
        })
    }

    /// Check for updates with a timeout
    ///
    /// Useful for startup checks where the app launch must not hang on a
    /// slow network.
    pub async fn check_latest_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<UpdateInfo>, String> {
        tokio::time::timeout(timeout, self.check_latest())
            .await
            .map_err(|_| format!("Update check timed out after {:?}", timeout))?
    }

    /// Check the latest GitHub release
    /// Returns UpdateInfo if a newer version is available, None if up-to-date
    ///
    /// Uses retry logic with exponential backoff (3 attempts: 1s, 2s, 4s delays)
    pub async fn check_latest(&self) -> Result<Option<UpdateInfo>, String> {
        let url = format!("https://api.github.com/repos/{}/releases/latest", GITHUB_REPO);

        info!("Checking for updates at {}", url);

        let release = with_retry(3, || async {
            let response = self
                .client
                .get(&url)
                .header("Accept", "application/vnd.github.v3+json")
                .send()
                .await
                .map_err(|e| format!("Network error: {}", e))?;

            // Rate limited: report how much quota is left
            if response.status() == reqwest::StatusCode::FORBIDDEN {
                let remaining = response
                    .headers()
                    .get("x-ratelimit-remaining")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                return Err(format!("GitHub API rate limited. Remaining: {}", remaining));
            }

            // No releases yet - not an error
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                debug!("No releases found on GitHub");
                return Ok(None);
            }

            if !response.status().is_success() {
                return Err(format!("GitHub API error: {}", response.status()));
            }

            let release: GithubRelease = response
                .json()
                .await
                .map_err(|e| format!("Failed to parse release info: {}", e))?;

            Ok(Some(release))
        })
        .await?;

        let release = match release {
            Some(r) => r,
            None => return Ok(None),
        };

        self.process_release(release)
    }

    /// Compare the release tag against the local version
    fn process_release(&self, release: GithubRelease) -> Result<Option<UpdateInfo>, String> {
        // Parse version from tag (e.g., "v0.1.8" -> "0.1.8")
        let tag = release.tag_name.trim_start_matches('v');
        let remote_version = Version::parse(tag)
            .map_err(|e| format!("Invalid version tag '{}': {}", release.tag_name, e))?;

        info!(
            "Current version: {}, Latest release: {}",
            self.current_version, remote_version
        );

        if release.prerelease {
            debug!("Latest release {} is a pre-release, ignoring", remote_version);
            return Ok(None);
        }

        if remote_version <= self.current_version {
            info!("Already on latest version");
            return Ok(None);
        }

        info!(
            "Update available: {} -> {}",
            self.current_version, remote_version
        );

        Ok(Some(UpdateInfo {
            version: remote_version.to_string(),
            html_url: release.html_url,
            release_notes: release.body,
            published_at: release.published_at,
        }))
    }

    /// Get the current version string
    pub fn current_version(&self) -> String {
        self.current_version.to_string()
    }
}
