//! TOML-based configuration for the plugin process.
//!
//! Reads `PluginConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\OutletPlugin\config.toml`
//! - Linux:    `~/.config/outlet-plugin/config.toml`
//! - macOS:    `~/Library/Application Support/OutletPlugin/config.toml`
//!
//! Example:
//!
//! ```toml
//! [host]
//! address = "127.0.0.1"
//! port = 10400
//!
//! [plugin]
//! instance_name = "garage"
//! connect_attempts = 3
//! ```
//!
//! Every field has a `#[serde(default = "...")]` function, so a missing file,
//! a missing section, or a missing key all fall back to working values.  The
//! device settings themselves live in a separate file (see `settings_file`);
//! this file only says how the plugin reaches its host.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level plugin configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PluginConfig {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub plugin: PluginSection,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where the host controller listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default = "default_host_address")]
    pub address: String,
    #[serde(default = "default_host_port")]
    pub port: u16,
}

/// Plugin identity and connection policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginSection {
    /// Instance label sent with the registration.  Empty = unnamed instance.
    #[serde(default)]
    pub instance_name: String,
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How many times to attempt the connect sequence before giving up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Upper bound on a single call over either channel.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

/// Location of the device settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Absent = `settings.toml` next to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host_address() -> String {
    "127.0.0.1".to_string()
}
fn default_host_port() -> u16 {
    10400
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_connect_attempts() -> u32 {
    3
}
fn default_retry_interval_secs() -> u64 {
    5
}
fn default_call_timeout_secs() -> u64 {
    10
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: default_host_address(),
            port: default_host_port(),
        }
    }
}

impl Default for PluginSection {
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            log_level: default_log_level(),
            connect_attempts: default_connect_attempts(),
            retry_interval_secs: default_retry_interval_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl PluginSection {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Resolves where the device settings file lives for `config`.
pub fn settings_file_path(config: &PluginConfig) -> Result<PathBuf, ConfigError> {
    match &config.storage.settings_file {
        Some(path) => Ok(path.clone()),
        None => Ok(config_dir()?.join("settings.toml")),
    }
}

/// Loads `PluginConfig` from `path`, returning defaults if the file does not
/// exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<PluginConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PluginConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
pub fn save_config_to(path: &Path, config: &PluginConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory including the `OutletPlugin`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("OutletPlugin"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("outlet-plugin"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("OutletPlugin")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
