//! Configuration file support for the circuit tools.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/circuit/config.toml`.

use crate::collaborators::ConfigStore;
use crate::{CircuitConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound for the between-sets rest
pub const MAX_SET_REST_SECS: u64 = 600;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub circuit: CircuitConfig,

    #[serde(default)]
    pub set_rest: SetRestConfig,

    #[serde(default)]
    pub feedback: FeedbackConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl DataConfig {
    /// JSON Lines file holding every logged set
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("log").join("sets.jsonl")
    }

    /// Directory for the run cache files
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }
}

/// Rest between sets of the same exercise
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetRestConfig {
    #[serde(default = "default_set_rest_seconds")]
    pub default_seconds: u64,
}

impl Default for SetRestConfig {
    fn default() -> Self {
        Self {
            default_seconds: default_set_rest_seconds(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedbackConfig {
    #[serde(default = "default_true")]
    pub sound: bool,

    #[serde(default = "default_true")]
    pub vibrate: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            sound: true,
            vibrate: true,
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("circuit")
}

fn default_set_rest_seconds() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        Self::load_or_default(&Self::default_config_path())
    }

    /// Load from `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config.clamped())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("circuit").join("config.toml")
    }

    /// Pull every bounded value into range
    pub fn clamped(mut self) -> Self {
        self.circuit = self.circuit.clamped();
        self.set_rest.default_seconds = self.set_rest.default_seconds.min(MAX_SET_REST_SECS);
        self
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

/// Circuit settings persisted in the config file
///
/// Saving changes only the `[circuit]` section; other sections are written
/// back as they were read when the store was opened.
#[derive(Clone, Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    config: Config,
}

impl FileConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = Config::load_or_default(&path)?;
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Apply `edit`, clamp, and write the whole file
    pub fn update(&mut self, edit: impl FnOnce(&mut Config)) -> Result<&Config> {
        edit(&mut self.config);
        self.config = self.config.clone().clamped();
        self.config.save_to(&self.path)?;
        Ok(&self.config)
    }
}

impl ConfigStore for FileConfigStore {
    fn load_config(&self) -> CircuitConfig {
        self.config.circuit.clamped()
    }

    fn save_config(&mut self, config: CircuitConfig) {
        let saved = self.update(|c| c.circuit = config).map(|_| ());
        if let Err(e) = saved {
            tracing::warn!("Failed to save circuit settings to {:?}: {}", self.path, e);
        }
    }
}
