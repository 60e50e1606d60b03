//! Bypass strategy profiles and selection
//!
//! A strategy is an immutable, ordered list of launch parameters for the
//! bypass process, identified by the stem of its profile file. The candidate
//! pool is loaded once at startup; the active selection is persisted through
//! [`Settings`] so it survives restarts.

use crate::settings::{save_settings, save_settings_to, Settings};
use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Strategy profile file extension
const PROFILE_EXTENSION: &str = "conf";

/// Maintenance profiles that must never appear in the candidate pool
const HIDDEN_PROFILES: [&str; 4] = [
    "check_updates",
    "service_install",
    "service_remove",
    "service_status",
];

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("Unknown strategy: {0}")]
    Unknown(String),

    #[error("Failed to persist strategy selection: {0}")]
    Persist(String),
}

/// A single bypass strategy profile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Strategy {
    /// Stable identifier (profile file stem)
    pub id: String,
    /// Human label shown by the UI
    pub label: String,
    /// Launch parameters for the bypass process
    pub args: Vec<String>,
}

/// Ordered candidate pool for discovery and manual pick.
///
/// Static per release: loaded once at startup, sorted by id so repeated
/// discovery runs probe in the same order.
#[derive(Debug, Clone, Default)]
pub struct StrategySet {
    strategies: Vec<Strategy>,
}

impl StrategySet {
    pub fn new(mut strategies: Vec<Strategy>) -> Self {
        strategies.sort_by(|a, b| a.id.cmp(&b.id));
        strategies.dedup_by(|a, b| a.id == b.id);
        Self { strategies }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.iter()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.id == id)
    }
}

/// Parse one profile file.
///
/// Each non-comment line contributes whitespace-separated launch arguments;
/// the first `#` comment line, if any, becomes the human label.
fn parse_profile(id: &str, content: &str) -> Strategy {
    let mut label: Option<String> = None;
    let mut args = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            if label.is_none() && !comment.trim().is_empty() {
                label = Some(comment.trim().to_string());
            }
            continue;
        }
        args.extend(line.split_whitespace().map(str::to_string));
    }

    Strategy {
        id: id.to_string(),
        label: label.unwrap_or_else(|| id.replace('_', " ")),
        args,
    }
}

/// Load the candidate pool from a profile directory.
///
/// Falls back to the built-in set when the directory is missing or holds no
/// usable profiles, so the app always has candidates to offer.
pub fn load_strategy_set(dir: &Path) -> StrategySet {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Strategy directory {:?} unavailable ({}), using built-in set", dir, e);
            return builtin_strategy_set();
        }
    };

    let mut strategies = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(PROFILE_EXTENSION) {
            continue;
        }
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };
        if HIDDEN_PROFILES.contains(&stem.as_str()) {
            continue;
        }
        match fs::read_to_string(&path) {
            Ok(content) => {
                let strategy = parse_profile(&stem, &content);
                if strategy.args.is_empty() {
                    warn!("Skipping empty strategy profile {:?}", path);
                } else {
                    strategies.push(strategy);
                }
            }
            Err(e) => warn!("Failed to read strategy profile {:?}: {}", path, e),
        }
    }

    if strategies.is_empty() {
        warn!("No strategy profiles in {:?}, using built-in set", dir);
        return builtin_strategy_set();
    }

    info!("Loaded {} strategy profiles from {:?}", strategies.len(), dir);
    StrategySet::new(strategies)
}

/// Built-in fallback profiles, mirroring the general/discord split shipped
/// with the app.
pub fn builtin_strategy_set() -> StrategySet {
    StrategySet::new(vec![
        Strategy {
            id: "general".to_string(),
            label: "General".to_string(),
            args: vec![
                "--qnum=200".to_string(),
                "--filter-tcp=80,443".to_string(),
                "--dpi-desync=fake,split2".to_string(),
                "--dpi-desync-ttl=3".to_string(),
            ],
        },
        Strategy {
            id: "general_alt".to_string(),
            label: "General (ALT)".to_string(),
            args: vec![
                "--qnum=200".to_string(),
                "--filter-tcp=80,443".to_string(),
                "--dpi-desync=fake,disorder2".to_string(),
                "--dpi-desync-fooling=md5sig".to_string(),
            ],
        },
        Strategy {
            id: "general_mgn".to_string(),
            label: "General (MGN)".to_string(),
            args: vec![
                "--qnum=200".to_string(),
                "--filter-tcp=443".to_string(),
                "--dpi-desync=split".to_string(),
                "--dpi-desync-split-pos=1".to_string(),
                "--dpi-desync-fooling=badseq".to_string(),
            ],
        },
        Strategy {
            id: "discord".to_string(),
            label: "Discord voice".to_string(),
            args: vec![
                "--qnum=200".to_string(),
                "--filter-udp=443,50000-50100".to_string(),
                "--dpi-desync=fake".to_string(),
                "--dpi-desync-repeats=6".to_string(),
            ],
        },
    ])
}

/// Persists the set of known strategies and which one is selected.
///
/// Selection changes never start or stop the service themselves; the caller
/// decides whether a restart is due.
pub struct StrategyStore {
    set: StrategySet,
    settings: Arc<Mutex<Settings>>,
    settings_path: Option<PathBuf>,
}

impl StrategyStore {
    /// Build a store over a loaded candidate pool and the shared settings.
    ///
    /// `settings_path` overrides the persistence location (tests, relocated
    /// config dirs); `None` uses the default settings file.
    pub fn new(
        set: StrategySet,
        settings: Arc<Mutex<Settings>>,
        settings_path: Option<PathBuf>,
    ) -> Self {
        Self {
            set,
            settings,
            settings_path,
        }
    }

    /// Read-only view of the candidate pool.
    pub fn all(&self) -> &StrategySet {
        &self.set
    }

    /// The currently selected strategy, or `None` before any selection.
    pub fn current(&self) -> Option<Strategy> {
        let selected = self.settings.lock().selected_strategy.clone()?;
        let found = self.set.get(&selected).cloned();
        if found.is_none() {
            warn!("Selected strategy '{}' is not in the candidate pool", selected);
        }
        found
    }

    /// Select and persist a strategy by id.
    ///
    /// On a persistence failure the previous selection is restored, so the
    /// in-memory state never diverges from disk.
    pub fn select(&self, id: &str) -> Result<Strategy, StrategyError> {
        let strategy = self
            .set
            .get(id)
            .cloned()
            .ok_or_else(|| StrategyError::Unknown(id.to_string()))?;

        let mut settings = self.settings.lock();
        let previous = settings.selected_strategy.replace(strategy.id.clone());

        let result = match &self.settings_path {
            Some(path) => save_settings_to(path, &settings),
            None => save_settings(&settings),
        };
        if let Err(e) = result {
            settings.selected_strategy = previous;
            return Err(StrategyError::Persist(e));
        }

        info!("Selected strategy '{}'", strategy.id);
        Ok(strategy)
    }
}
