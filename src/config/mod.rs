//! Configuration management for the ventilation coordinator
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `VENTILATION_*` environment variables. Nested keys use a double
//! underscore, e.g. `VENTILATION_POLLING__SCAN_INTERVAL=30s`.

use crate::coordinator::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment variables read by [`ServerConfig::load`]
pub const ENV_PREFIX: &str = "VENTILATION";

/// Default name of a ventilation unit
pub const DEFAULT_NAME: &str = "Vallox";

/// Default time between scheduled fetches
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Complete configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Ventilation unit connection
    pub device: DeviceConfig,

    /// Refresh scheduling
    pub polling: PollingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Ventilation unit connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// IP address of the unit
    pub host: String,

    /// Display name used in logs and as coordinator name
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            name: DEFAULT_NAME.to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Parsed unit address
    pub fn address(&self) -> Result<IpAddr> {
        self.host.parse().map_err(|e| {
            CoordinatorError::configuration(format!(
                "Invalid device host '{}': {}",
                self.host, e
            ))
        })
    }
}

/// Refresh scheduling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    /// Time between scheduled fetches
    #[serde(with = "humantime_serde")]
    pub scan_interval: Duration,

    /// Upper bound for a single fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Option<Duration>,

    /// Updates buffered per subscriber before it starts lagging
    pub event_buffer: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            scan_interval: DEFAULT_SCAN_INTERVAL,
            fetch_timeout: None,
            event_buffer: 64,
        }
    }
}

impl PollingConfig {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            update_interval: self.scan_interval,
            fetch_timeout: self.fetch_timeout,
            event_buffer: self.event_buffer,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log to file (path); rotated daily
    pub file: Option<PathBuf>,

    /// Enable structured JSON logging
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn log_config(&self) -> Result<LogConfig> {
        let level = self.level.parse().map_err(|_| {
            CoordinatorError::configuration(format!("Invalid log level '{}'", self.level))
        })?;
        Ok(LogConfig {
            level,
            file_path: self.file.clone(),
            json: self.json,
            ..LogConfig::default()
        })
    }
}

impl ServerConfig {
    /// Load defaults, then `path` (if given), then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_overrides(path, &[])
    }

    /// Like [`load`](Self::load), with `(key, value)` pairs applied last
    ///
    /// Keys use dotted paths such as `device.host`.
    pub fn load_with_overrides(path: Option<&Path>, overrides: &[(&str, &str)]) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load from the environment only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.device.host.trim().is_empty() {
            return Err(CoordinatorError::configuration("Device host cannot be empty"));
        }
        self.device.address()?;

        if self.device.name.trim().is_empty() {
            return Err(CoordinatorError::configuration("Device name cannot be empty"));
        }

        if self.polling.scan_interval < MIN_SCAN_INTERVAL {
            return Err(CoordinatorError::configuration(format!(
                "Scan interval must be at least {:?}",
                MIN_SCAN_INTERVAL
            )));
        }

        if self.polling.fetch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CoordinatorError::configuration(
                "Fetch timeout must be greater than zero",
            ));
        }

        if self.polling.event_buffer == 0 {
            return Err(CoordinatorError::configuration(
                "Event buffer must hold at least one update",
            ));
        }

        self.logging.log_config()?;
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
