// src/config.rs

//! Defines the configuration structures for the display controller.
//!
//! Every section can be deserialized from a JSON file named by the
//! `DISPLAY_CONTROLLER_CONFIG` environment variable. Missing fields fall back
//! to the defaults below, so an empty object `{}` is a valid configuration.
//!
//! The controller itself never reads [`CONFIG`]; it is handed a `Config`
//! at construction. The global exists for the binary and for callers that
//! want the process-wide settings.

use anyhow::{Context, Result};
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "DISPLAY_CONTROLLER_CONFIG";

/// Process-wide configuration, loaded on first access.
pub static CONFIG: Lazy<Config> = Lazy::new(|| match Config::from_env() {
    Ok(config) => config,
    Err(e) => {
        warn!("Falling back to default configuration: {:#}", e);
        Config::default()
    }
});

// --- Top-Level Configuration Structure ---

/// Represents the complete configuration for the display controller.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Display spec formatting.
    pub display: DisplayConfig,
    /// Dispatcher poll loop settings.
    pub dispatcher: DispatcherConfig,
    /// Look-ahead geometry probe bounds.
    pub probe: ProbeConfig,
    /// Inter-process channel settings.
    pub channel: ChannelConfig,
}

impl Config {
    /// Loads the configuration named by `DISPLAY_CONTROLLER_CONFIG`, or the
    /// defaults when the variable is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => {
                info!("{} not set, using default configuration", CONFIG_PATH_ENV);
                Ok(Self::default())
            }
        }
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Invalid display controller configuration")
    }
}

// --- Display Configuration ---

/// Settings for the `"<width>x<height>*<scale>"` display spec string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Scale suffix written after the `*`.
    pub spec_scale: u32,
    /// Capacity of the spec buffer, terminator included. The formatted
    /// string is truncated to `spec_capacity - 1` bytes.
    pub spec_capacity: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            spec_scale: 2,
            spec_capacity: 20,
        }
    }
}

// --- Dispatcher Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// How long one `poll(2)` call in the background loop may block before
    /// the loop re-checks its shutdown flag.
    pub poll_timeout_ms: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            poll_timeout_ms: 50,
        }
    }
}

// --- Probe Configuration ---

/// Bounds for the look-ahead output geometry probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Give up waiting for the primary output after this long.
    pub timeout_ms: u64,
    /// Pause between round trips. Zero spins.
    pub retry_interval_ms: u64,
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            timeout_ms: 2_000,
            retry_interval_ms: 1,
        }
    }
}

// --- Channel Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Messages the host endpoint holds while the channel is down. When
    /// full, further widget commands are refused with an error.
    pub max_queued_messages: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            max_queued_messages: 256,
        }
    }
}
