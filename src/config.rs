// SPDX-License-Identifier: GPL-3.0-only

//! Worker configuration
//!
//! Stored as JSON in `<config dir>/camera-worker/config.json`. Missing files
//! and missing keys fall back to defaults.

use crate::constants::{logging, paths, worker};
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the camera worker thread
    pub thread_name: String,
    /// Stack size for the worker thread in bytes (platform default when unset)
    pub stack_size: Option<usize>,
    /// tracing filter used when RUST_LOG is not set
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thread_name: worker::DEFAULT_THREAD_NAME.to_string(),
            stack_size: None,
            log_filter: logging::DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Default location of the configuration file, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(paths::APP_DIR_NAME).join(paths::CONFIG_FILE_NAME))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> AppResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory on this platform, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;

        if config.thread_name.is_empty() {
            return Err(AppError::Config(format!(
                "{}: thread_name must not be empty",
                path.display()
            )));
        }

        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
