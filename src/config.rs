//! On-disk configuration
//!
//! Single TOML file at `<config_dir>/procontroller/config.toml`. Every field
//! has a default, so a partial or missing file is fine.
//!
//! ```toml
//! [driver]
//! poll_timeout_ms = 50
//! rescan_interval_ms = 500
//! step_interval_ms = 16
//! pipeline_enabled = true
//!
//! [inference]
//! model_path = "/home/me/.config/procontroller/gesture.toml"
//!
//! [logging]
//! level = "info"
//! ```

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn, Level};

use crate::inference::InferenceConfig;

const CONFIG_DIR: &str = "procontroller";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub driver: DriverConfig,
    pub inference: InferenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    /// Longest wait inside the host run loop
    pub poll_timeout_ms: u64,
    /// Device rescan interval while no controller is attached
    pub rescan_interval_ms: u64,
    /// Pause between pipeline consumption steps
    pub step_interval_ms: u64,
    pub pipeline_enabled: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 50,
            rescan_interval_ms: 500,
            step_interval_ms: 16,
            pipeline_enabled: true,
        }
    }
}

impl DriverConfig {
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Parsed level, `INFO` when the configured name is not recognised.
    pub fn level(&self) -> Level {
        self.level.parse().unwrap_or_else(|_| {
            warn!("Unknown log level '{}', using info", self.level);
            Level::INFO
        })
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        fs::write(path, content).map_err(|e| eyre!("Failed to write config file: {}", e))?;
        debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Loads `path`, writing the defaults there first if it does not exist.
    pub fn ensure_default_config(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Creating default configuration at {}", path.display());
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }
        Self::load_from(path)
    }

    /// Like [`Config::ensure_default_config`], but falls back to the
    /// built-in defaults instead of failing.
    pub fn load_or_default(path: &Path) -> Self {
        Self::ensure_default_config(path).unwrap_or_else(|e| {
            warn!("Using default configuration: {}", e);
            Config::default()
        })
    }
}
