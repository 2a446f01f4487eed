//! Updater settings with JSON persistence.
//!
//! Every field has a default, so a settings file written by an older build
//! (or an empty one) still loads.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::dfu::DfuConfig;

/// User-adjustable updater settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdaterSettings {
    /// Where the release catalog is fetched from. No catalog is fetched when unset.
    pub releases_url: Option<String>,

    /// Offer beta releases.
    pub include_beta: bool,

    /// Packets per receipt notification during transfer. 0 is treated as 1.
    pub packet_receipt_interval: u16,

    pub discovery_timeout_ms: u64,
    pub reconnect_timeout_ms: u64,
    pub validation_timeout_ms: u64,
    pub response_timeout_ms: u64,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        let dfu = DfuConfig::default();
        Self {
            releases_url: None,
            include_beta: false,
            packet_receipt_interval: dfu.packet_receipt_interval,
            discovery_timeout_ms: dfu.discovery_timeout.as_millis() as u64,
            reconnect_timeout_ms: dfu.reconnect_timeout.as_millis() as u64,
            validation_timeout_ms: dfu.validation_timeout.as_millis() as u64,
            response_timeout_ms: dfu.response_timeout.as_millis() as u64,
        }
    }
}

impl UpdaterSettings {
    /// Engine configuration for these settings.
    pub fn dfu_config(&self) -> DfuConfig {
        DfuConfig {
            discovery_timeout: Duration::from_millis(self.discovery_timeout_ms),
            reconnect_timeout: Duration::from_millis(self.reconnect_timeout_ms),
            validation_timeout: Duration::from_millis(self.validation_timeout_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            packet_receipt_interval: self.packet_receipt_interval,
            ..DfuConfig::default()
        }
        .with_flow_control()
    }
}

/// Errors loading or saving the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to write settings file: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to parse settings JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings file name stored in app data directory.
const SETTINGS_FILENAME: &str = "updater_settings.json";

/// Manages persistence of updater settings to JSON file.
pub struct SettingsManager {
    settings_file_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager for the given app data directory.
    pub fn new(app_data_dir: &Path) -> Self {
        let settings_file_path = app_data_dir.join(SETTINGS_FILENAME);
        Self { settings_file_path }
    }

    /// Load settings from disk, returning defaults if file doesn't exist.
    pub fn load(&self) -> Result<UpdaterSettings, SettingsError> {
        if !self.settings_file_path.exists() {
            return Ok(UpdaterSettings::default());
        }

        let contents = fs::read_to_string(&self.settings_file_path).map_err(SettingsError::Read)?;

        // Handle empty file gracefully
        if contents.trim().is_empty() {
            return Ok(UpdaterSettings::default());
        }

        Ok(serde_json::from_str(&contents)?)
    }

    /// Save settings to disk.
    pub fn save(&self, settings: &UpdaterSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.settings_file_path.parent() {
            fs::create_dir_all(parent).map_err(SettingsError::Write)?;
        }

        let contents = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_file_path, contents).map_err(SettingsError::Write)?;

        Ok(())
    }

    /// Get the path where settings are stored.
    pub fn settings_path(&self) -> &Path {
        &self.settings_file_path
    }
}
