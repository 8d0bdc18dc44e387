//! Configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Settings persisted by the uploader front-ends.
///
/// Only read here; every field is optional so partial files load cleanly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderSettings {
    /// Sentinel origin, e.g. `https://intel.example.com`.
    pub base_url: String,
    /// Long-lived uploader token.
    pub token: String,
    /// Directory containing chat logs.
    pub log_dir: String,
    /// Enable verbose debug output.
    pub debug: bool,
}

/// Effective runtime options after merging CLI, environment and settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    pub base_url: String,
    pub token: String,
    /// Directory scanned for chat logs.
    pub log_dir: Option<PathBuf>,
    /// Single log file to follow instead of scanning a directory.
    pub log_file: Option<PathBuf>,
    pub debug: bool,
}

impl Options {
    /// Fill unset fields from saved settings.
    ///
    /// Values already present (from CLI or environment) win.
    #[must_use]
    pub fn merge_settings(mut self, saved: &UploaderSettings) -> Self {
        if self.base_url.trim().is_empty() {
            self.base_url = saved.base_url.trim().to_string();
        }
        if self.token.trim().is_empty() {
            self.token = saved.token.trim().to_string();
        }
        if self.log_dir.is_none() && !saved.log_dir.trim().is_empty() {
            self.log_dir = Some(PathBuf::from(saved.log_dir.trim()));
        }
        self.debug |= saved.debug;
        self
    }

    /// Use the platform default log directory when no log location is set.
    #[must_use]
    pub fn with_default_log_dir(mut self) -> Self {
        if self.log_dir.is_none() && self.log_file.is_none() {
            self.log_dir = default_log_dir();
        }
        self
    }

    /// Check that everything needed to start is present.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.log_dir.is_none() && self.log_file.is_none() {
            return Err(ConfigError::MissingLogLocation);
        }
        Ok(())
    }
}

/// Default chat log directory: `~/Documents/EVE/logs/Chatlogs`.
#[must_use]
pub fn default_log_dir() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    Some(home.join("Documents").join("EVE").join("logs").join("Chatlogs"))
}
