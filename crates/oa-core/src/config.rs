//! Configuration management

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const APP_DIR: &str = "oxide-audio";
const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub debug: DebugConfig,
}

/// Device defaults applied by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Preferred sample rate for new sessions; device default when unset
    pub sample_rate: Option<u32>,
    /// Preferred period size for new sessions; device default when unset
    pub buffer_size_frames: Option<u32>,
    /// Re-enumeration cadence for backends without native hot-plug events
    pub hotplug_poll_interval_ms: u64,
    /// Depth of poll-driven byte queues, in periods
    pub queue_periods: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            buffer_size_frames: None,
            hotplug_poll_interval_ms: 1000,
            queue_periods: 8,
        }
    }
}

/// Debug configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub log_to_file: bool,
    pub log_path: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_to_file: false,
            log_path: PathBuf::from("oxide-audio.log"),
        }
    }
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl Config {
    /// Default location of the configuration file
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load and validate a configuration file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values no device can honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.sample_rate == Some(0) {
            return Err(ConfigError::Invalid {
                field: "audio.sample_rate",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.audio.buffer_size_frames == Some(0) {
            return Err(ConfigError::Invalid {
                field: "audio.buffer_size_frames",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.audio.hotplug_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "audio.hotplug_poll_interval_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.audio.queue_periods == 0 {
            return Err(ConfigError::Invalid {
                field: "audio.queue_periods",
                reason: "must be at least one period".to_string(),
            });
        }
        Ok(())
    }
}
