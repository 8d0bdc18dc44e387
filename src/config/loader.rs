//! Settings file loader.

use std::path::PathBuf;

use super::UploaderSettings;

/// Settings loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: .sentinel-uploader.toml
        search_paths.push(PathBuf::from(".sentinel-uploader.toml"));

        // 2. User config directory: ~/.config/sentinel-uploader/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("sentinel-uploader").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a loader with a specific settings file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load settings from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<UploaderSettings, ConfigError> {
        match self.find_config_file() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading settings file");
                Self::load_from_path(&path)
            }
            None => {
                tracing::debug!("No settings file found, using defaults");
                Ok(UploaderSettings::default())
            }
        }
    }

    fn load_from_path(path: &PathBuf) -> Result<UploaderSettings, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find the first settings file that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("base URL is required")]
    MissingBaseUrl,

    #[error("uploader token is required")]
    MissingToken,

    #[error("set either log file or log directory")]
    MissingLogLocation,

    #[error("invalid base URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}
