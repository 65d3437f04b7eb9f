//! Configuration module for BusBridge-RS
//!
//! The bridge is configured from a single TOML file. Every section and field
//! has a default, so an empty file (or no file at all) yields a working
//! configuration that listens for notification signals on the session bus.
//!
//! # Config Location
//!
//! The default file lives in the platform configuration directory:
//! - **Linux**: `~/.config/busbridge-rs/config.toml`
//! - **macOS**: `~/Library/Application Support/busbridge-rs/config.toml`
//! - **Windows**: `%APPDATA%\busbridge-rs\config.toml`
//!
//! # Example
//!
//! ```toml
//! [bus]
//! signal_queue_capacity = 256
//! overflow_policy = "drop_newest"
//!
//! [inbound]
//! address = "@system"
//! filter = "type='signal',interface='org.freedesktop.login1.Manager'"
//!
//! [outbound]
//! enabled = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bus::{OverflowPolicy, DEFAULT_SIGNAL_CAPACITY};
use crate::error::{BridgeError, Result};
use crate::signature::check_signature;

/// Application identifier for the config directory
pub const APP_ID: &str = "busbridge-rs";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default bus address for both blocks
pub const DEFAULT_ADDRESS: &str = "@session";

/// Default inbound match rule
pub const DEFAULT_FILTER: &str = "type='signal',sender='org.freedesktop.Notifications'";

pub const DEFAULT_DESTINATION: &str = "org.freedesktop.Notifications";
pub const DEFAULT_OBJECT_PATH: &str = "/org/freedesktop/Notifications";
pub const DEFAULT_METHOD: &str = "org.freedesktop.Notifications.Notify";

/// Argument signature of `Notify`
pub const DEFAULT_SIGNATURE: &str = "susssasa{sv}i";

/// Default tracing filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,busbridge_rs=debug";

// ==================== Config Directory ====================

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Bridge Config ====================

/// Complete bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Config format version
    #[serde(default = "default_config_version")]
    pub version: u32,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub inbound: InboundSettings,

    #[serde(default)]
    pub outbound: OutboundSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_config_version() -> u32 {
    1
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            bus: BusSettings::default(),
            inbound: InboundSettings::default(),
            outbound: OutboundSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::from_toml(&content)
            .map_err(|e| e.with_context(format!("Invalid config file {:?}", path)))
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Parse a config from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Render the config as TOML text
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Save the config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BridgeError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| {
            BridgeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check settings that serde cannot check
    pub fn validate(&self) -> Result<()> {
        if self.bus.signal_queue_capacity == 0 {
            return Err(BridgeError::Config(
                "bus.signal_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.inbound.enabled && self.inbound.filter.trim().is_empty() {
            return Err(BridgeError::Config(
                "inbound.filter must not be empty".to_string(),
            ));
        }
        if self.outbound.enabled {
            check_signature(&self.outbound.signature)
                .map_err(|e| BridgeError::from(e).with_context("outbound.signature"))?;
        }
        Ok(())
    }
}

/// Settings shared by every bus connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSettings {
    /// Capacity of the inbound signal queue
    #[serde(default = "default_signal_queue_capacity")]
    pub signal_queue_capacity: usize,

    /// What to drop when the signal queue is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

fn default_signal_queue_capacity() -> usize {
    DEFAULT_SIGNAL_CAPACITY
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            signal_queue_capacity: default_signal_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

/// Inbound block settings (bus signals into the pipeline)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_address")]
    pub address: String,

    /// Match rule selecting the signals to forward
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for InboundSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_address(),
            filter: default_filter(),
        }
    }
}

/// Outbound block settings (pipeline messages into method calls)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_destination")]
    pub destination: String,

    #[serde(default = "default_object_path")]
    pub object_path: String,

    /// Fully qualified `interface.member`
    #[serde(default = "default_method")]
    pub method: String,

    /// Argument signature
    #[serde(default = "default_signature")]
    pub signature: String,
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_address(),
            destination: default_destination(),
            object_path: default_object_path(),
            method: default_method(),
            signature: default_signature(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `tracing` filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            log_dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_filter() -> String {
    DEFAULT_FILTER.to_string()
}

fn default_destination() -> String {
    DEFAULT_DESTINATION.to_string()
}

fn default_object_path() -> String {
    DEFAULT_OBJECT_PATH.to_string()
}

fn default_method() -> String {
    DEFAULT_METHOD.to_string()
}

fn default_signature() -> String {
    DEFAULT_SIGNATURE.to_string()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
