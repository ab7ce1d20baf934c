//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/pace.toml` by default)
//! 2. Environment variables prefixed with `PACE_`, nested keys separated by
//!    `__` (e.g. `PACE_CONNECTION__ADDRESS=tcp://10.0.0.7`)
//!
//! # Example
//! ```no_run
//! use pace_scpi::config::PaceConfig;
//!
//! let config = PaceConfig::load()?;
//! config.validate()?;
//! println!("Controller at {}", config.connection.address);
//! # Ok::<(), pace_scpi::error::PaceError>(())
//! ```

use crate::device::{Pace, DEFAULT_MODULES};
use crate::engine::Engine;
use crate::error::{PaceError, PaceResult};
use crate::simulator::SimulatorConfig;
use crate::transport::tcp::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_TIMEOUT_MS};
use crate::transport::Address;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/pace.toml";

/// Smallest batch line ceiling accepted
pub const MIN_LINE_LENGTH: usize = 16;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaceConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Controller connection
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Device layout and batching
    #[serde(default)]
    pub device: DeviceConfig,
    /// Simulator served by `pace simulate`
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Connection to the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// `tcp://host[:port]`
    #[serde(default = "default_address")]
    pub address: String,
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Reply timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

/// Device layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Fitted module ids
    #[serde(default = "default_modules")]
    pub modules: Vec<u8>,
    /// Batch line ceiling in characters
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

// Default value functions
fn default_name() -> String {
    "PACE controller".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_address() -> String {
    "tcp://localhost:5025".to_string()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_modules() -> Vec<u8> {
    DEFAULT_MODULES.to_vec()
}

fn default_max_line_length() -> usize {
    crate::batch::DEFAULT_MAX_LINE
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            connect_timeout_ms: default_connect_timeout(),
            timeout_ms: default_timeout(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            modules: default_modules(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl ConnectionConfig {
    pub fn address(&self) -> PaceResult<Address> {
        self.address.parse()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl DeviceConfig {
    /// Apply module layout and line ceiling to a device.
    pub fn apply<E: Engine>(&self, pace: Pace<E>) -> Pace<E> {
        pace.with_modules(self.modules.iter().copied())
            .with_max_line(self.max_line_length)
    }
}

impl PaceConfig {
    /// Load configuration from `config/pace.toml` and environment variables
    pub fn load() -> PaceResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file yields
    /// the defaults (plus environment overrides).
    pub fn load_from<P: AsRef<Path>>(path: P) -> PaceResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PACE_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> PaceResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(PaceError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.connection.address()?;

        if self.device.modules.is_empty() {
            return Err(PaceError::Config("At least one module must be configured".to_string()));
        }
        let mut ids = std::collections::HashSet::new();
        for id in &self.device.modules {
            if !(1..=9).contains(id) {
                return Err(PaceError::Config(format!("Invalid module id {}. Must be 1-9", id)));
            }
            if !ids.insert(id) {
                return Err(PaceError::Config(format!("Duplicate module id: {}", id)));
            }
        }

        if self.device.max_line_length < MIN_LINE_LENGTH {
            return Err(PaceError::Config(format!(
                "Invalid max_line_length {}. Must be at least {}",
                self.device.max_line_length, MIN_LINE_LENGTH
            )));
        }

        Ok(())
    }

    /// Render as TOML, e.g. to bootstrap a configuration file.
    pub fn to_toml(&self) -> PaceResult<String> {
        toml::to_string_pretty(self).map_err(|e| PaceError::Config(e.to_string()))
    }
}
