//! Configuration for the store cache
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/storecache/config.toml
//! - Linux: ~/.config/storecache/config.toml
//! - Windows: %APPDATA%/storecache/config.toml

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// Subdirectory of the configured cache directory that holds blob files
pub const CACHE_SUBDIR: &str = "storecache";

/// Default byte budget (5GB)
pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache settings
    pub cache: CacheConfig,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory (uses system cache dir if None)
    pub cache_dir: Option<PathBuf>,
    /// Maximum total bytes of cached blobs
    pub max_bytes: u64,
    /// Check fetched and mirrored data against content-hash references
    pub verify_references: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_bytes: DEFAULT_MAX_BYTES,
            verify_references: false,
        }
    }
}

impl CacheConfig {
    /// Config rooted at an explicit directory
    pub fn with_dir(cache_dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
            max_bytes,
            verify_references: false,
        }
    }

    /// Directory that holds the blob files: `<cache_dir>/storecache`
    pub fn root_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .or_else(Config::default_cache_dir)
            .unwrap_or_else(|| std::env::temp_dir().join("storecache-cache"))
            .join(CACHE_SUBDIR)
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "storecache").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default cache directory
    pub fn default_cache_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "storecache").map(|dirs| dirs.cache_dir().to_path_buf())
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}
