//! Configuration types for the controller loop

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LoggingConfig;
use crate::retry::RetryConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration, usually loaded from a TOML file.
///
/// ```toml
/// [controller]
/// max_passes = 100
///
/// [retry]
/// max_attempts = 5
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ReconcilerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ReconcilerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the controller loop cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.max_passes == 0 {
            return Err(ConfigError::Invalid {
                field: "controller.max_passes",
                reason: "must be at least 1".to_string(),
            });
        }

        let retry = &self.retry;
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 0.0 {
            return Err(ConfigError::Invalid {
                field: "retry.backoff_multiplier",
                reason: format!("{} is not a finite, non-negative number", retry.backoff_multiplier),
            });
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry.initial_delay_ms",
                reason: format!(
                    "{} exceeds retry.max_delay_ms ({})",
                    retry.initial_delay_ms, retry.max_delay_ms
                ),
            });
        }

        Ok(())
    }
}

/// Settings for the pass loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Upper bound of passes for one `run_until_converged` call
    #[serde(default = "default_max_passes")]
    pub max_passes: u32,
}

fn default_max_passes() -> u32 {
    100
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_passes: default_max_passes(),
        }
    }
}

/// Serializable form of [`RetryConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Consecutive failed passes before giving up (0 = infinite)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}
