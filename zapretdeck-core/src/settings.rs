//! Settings persistence module
//!
//! Saves and loads app settings to/from disk

use crate::updater::UpdateSettings;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";
const APP_NAME: &str = "ZapretDeck";

/// App settings persisted between runs
///
/// Every field carries `serde(default)` so settings files written by older
/// versions keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Whether the bypass service is registered to persist across reboots
    #[serde(default)]
    pub background_service: bool,
    /// Whether the game traffic filter is enabled
    #[serde(default)]
    pub game_filter: bool,
    /// Identifier of the currently selected bypass strategy
    #[serde(default)]
    pub selected_strategy: Option<String>,
    /// Update check preferences
    #[serde(default)]
    pub update_settings: UpdateSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            background_service: false,
            game_filter: false,
            selected_strategy: None,
            update_settings: UpdateSettings::default(),
        }
    }
}

/// Get the settings directory path
fn get_settings_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}

/// Get the full path to the settings file
pub fn default_settings_path() -> Option<PathBuf> {
    get_settings_dir().map(|p| p.join(SETTINGS_FILE))
}

/// Load settings from the default location
pub fn load_settings() -> Settings {
    match default_settings_path() {
        Some(path) => load_settings_from(&path),
        None => {
            debug!("Could not determine settings path, using defaults");
            Settings::default()
        }
    }
}

/// Load settings from an explicit path
pub fn load_settings_from(path: &Path) -> Settings {
    if !path.exists() {
        debug!("Settings file does not exist, using defaults");
        return Settings::default();
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(settings) => {
                info!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                error!("Failed to parse settings file: {}", e);
                Settings::default()
            }
        },
        Err(e) => {
            error!("Failed to read settings file: {}", e);
            Settings::default()
        }
    }
}

/// Save settings to the default location
pub fn save_settings(settings: &Settings) -> Result<(), String> {
    let path = match default_settings_path() {
        Some(p) => p,
        None => return Err("Could not determine settings directory".to_string()),
    };
    save_settings_to(&path, settings)
}

/// Save settings to an explicit path
pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<(), String> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            if let Err(e) = fs::create_dir_all(dir) {
                return Err(format!("Failed to create settings directory: {}", e));
            }
        }
    }

    let json = match serde_json::to_string_pretty(settings) {
        Ok(j) => j,
        Err(e) => return Err(format!("Failed to serialize settings: {}", e)),
    };

    match fs::write(path, json) {
        Ok(_) => {
            info!("Saved settings to {:?}", path);
            Ok(())
        }
        Err(e) => Err(format!("Failed to write settings file: {}", e)),
    }
}
