//! Configuration loading and config file resolution
//!
//! Bootstrap configuration comes from a single TOML file. Every field has a
//! built-in default, so a missing file at the default location is not an
//! error: the defaults are used and a debug record is logged.
//!
//! # Config File Priority
//!
//! 1. Command-line argument (highest priority)
//! 2. `COOKPASS_CONFIG` environment variable
//! 3. `<config dir>/cookpass/config.toml` (only if it exists)
//! 4. Built-in defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "COOKPASS_CONFIG";

/// Default event bus capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Processing session settings (optional)
    #[serde(default)]
    pub session: SessionSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Settings applied to every processing session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    /// Upper bound on executed passes, applied on top of the source's own
    /// declared capability. `None` leaves the source capability untouched.
    #[serde(default)]
    pub max_passes: Option<usize>,

    /// Capacity of the session event bus
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Fail scheduling when a dependency outside the registered cooker set
    /// has no externally supplied result.
    #[serde(default)]
    pub strict_external_dependencies: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_passes: None,
            event_capacity: default_event_capacity(),
            strict_external_dependencies: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl TomlConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded TOML configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the config file by priority and load it, falling back to
    /// defaults when nothing is configured
    pub fn resolve(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg) {
            Some(path) => Self::load(&path),
            None => {
                debug!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.session.max_passes == Some(0) {
            return Err(Error::Config(
                "session.max_passes must be at least 1".to_string(),
            ));
        }
        if self.session.event_capacity == 0 {
            return Err(Error::Config(
                "session.event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve which config file to read
///
/// Explicit sources (CLI, environment) are returned even when the file does
/// not exist so that loading reports the mistake. The platform default is
/// only returned when present.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path().filter(|path| path.exists())
}

/// Platform config file location (`~/.config/cookpass/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cookpass").join("config.toml"))
}
