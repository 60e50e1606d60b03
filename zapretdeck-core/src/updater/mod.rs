//! Update checking
//!
//! Read-only: fetches the latest GitHub release and compares versions.
//! Downloading and installing updates is the user's business; the app only
//! shows a banner.

pub mod checker;
pub mod types;

pub use checker::UpdateChecker;
pub use types::{GithubRelease, UpdateInfo, UpdateSettings, UpdateState};
