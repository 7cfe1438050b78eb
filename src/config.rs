//! Configuration loading using Figment
//!
//! This module provides strongly-typed configuration for the acquisition
//! controller. Configuration is loaded from:
//! 1. A TOML file (base configuration, `config/daq.toml` by default)
//! 2. Environment variables (prefixed with `SPECTRO_DAQ_`)
//!
//! # Example
//! ```no_run
//! use spectro_daq::config::DaqConfig;
//!
//! let config = DaqConfig::load()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), spectro_daq::error::DaqError>(())
//! ```

use crate::data::Detector;
use crate::error::{DaqError, DaqResult};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Session timing
    #[serde(default)]
    pub session: SessionConfig,
    /// Detectors attached to the setup
    #[serde(default)]
    pub detectors: Vec<Detector>,
    /// Producer definitions
    #[serde(default)]
    pub producers: Vec<ProducerDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Session controller timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Progress poll interval while running, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Queue re-check interval while draining, in milliseconds
    #[serde(default = "default_drain_interval")]
    pub drain_interval_ms: u64,
    /// Default run length in seconds (None = until cancelled)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Producer definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerDefinition {
    /// Unique producer identifier
    pub id: String,
    /// Driver type (e.g., "mock")
    pub r#type: String,
    /// Whether this producer is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Driver-specific configuration (dynamic)
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_drain_interval() -> u64 {
    50
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            drain_interval_ms: default_drain_interval(),
            timeout_secs: None,
        }
    }
}

impl SessionConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Drain re-check interval as a duration.
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    /// Configured run length, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl DaqConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables can override configuration with prefix SPECTRO_DAQ_
    /// (nested keys separated by `__`), e.g. SPECTRO_DAQ_APPLICATION__LOG_LEVEL=debug
    pub fn load() -> DaqResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> DaqResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SPECTRO_DAQ_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> DaqResult<()> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.session.poll_interval_ms == 0 || self.session.drain_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "Session poll and drain intervals must be non-zero".to_string(),
            ));
        }

        // Validate producer IDs are unique
        let mut ids = std::collections::HashSet::new();
        for producer in &self.producers {
            if !ids.insert(&producer.id) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate producer ID: {}",
                    producer.id
                )));
            }
        }

        Ok(())
    }

    /// Get all enabled producers
    pub fn enabled_producers(&self) -> Vec<&ProducerDefinition> {
        self.producers
            .iter()
            .filter(|producer| producer.enabled)
            .collect()
    }
}
