//! Breaker configuration and TOML settings
//!
//! Option names follow the wire names used by the services that configure
//! breakers (`errorThreshold`, `timeout`, `healthRequests`, `sleepTimeMS`,
//! `maxRequests`), so a settings file reads the same as the call sites it
//! replaces:
//!
//! ```toml
//! [defaults]
//! errorThreshold = 20
//! timeout = 20000
//! healthRequests = 5
//! sleepTimeMS = 100
//! maxRequests = 0
//!
//! [breakers.usersGetCustomer]
//! timeout = 5000
//! ```

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Config {
    /// Failure rate (percent, 1-100) that trips a closed circuit
    pub error_threshold: u8,

    /// Per-call deadline in milliseconds
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,

    /// Probe budget while half-open; this many successes close the circuit
    pub health_requests: usize,

    /// Minimum time in milliseconds the circuit stays open before probing
    #[serde(rename = "sleepTimeMS")]
    pub sleep_time_ms: u64,

    /// Concurrency cap while closed (0 = unbounded)
    pub max_requests: usize,

    /// Outcomes the window must hold before the failure rate is evaluated
    pub minimum_requests: usize,

    /// Sliding window in seconds for failure rate calculation
    pub window_secs: f64,

    /// Jitter applied to the open duration (0.0 = none, 1.0 = up to double)
    /// Jitter only extends the sleep, `sleep_time_ms` stays a floor
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            error_threshold: 20,
            timeout_ms: 20_000,
            health_requests: 5,
            sleep_time_ms: 100,
            max_requests: 0,
            minimum_requests: 10,
            window_secs: 60.0,
            jitter_factor: 0.0,
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sleep_time(&self) -> Duration {
        Duration::from_millis(self.sleep_time_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::try_from_secs_f64(self.window_secs).unwrap_or(Duration::MAX)
    }

    /// Check every option, reporting the first invalid one
    pub fn validate(&self, circuit: &str) -> Result<(), ConfigError> {
        let circuit_name = || circuit.to_string();

        if circuit.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if !(1..=100).contains(&self.error_threshold) {
            return Err(ConfigError::InvalidErrorThreshold {
                circuit: circuit_name(),
                value: self.error_threshold,
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                circuit: circuit_name(),
            });
        }
        if self.health_requests == 0 {
            return Err(ConfigError::ZeroHealthRequests {
                circuit: circuit_name(),
            });
        }
        if self.minimum_requests == 0 {
            return Err(ConfigError::ZeroMinimumRequests {
                circuit: circuit_name(),
            });
        }
        if self.window_secs <= 0.0 || Duration::try_from_secs_f64(self.window_secs).is_err() {
            return Err(ConfigError::InvalidWindow {
                circuit: circuit_name(),
                value: self.window_secs,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidJitter {
                circuit: circuit_name(),
                value: self.jitter_factor,
            });
        }
        Ok(())
    }
}

/// Per-breaker overrides layered on top of [`Settings::defaults`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigOverrides {
    pub error_threshold: Option<u8>,
    #[serde(rename = "timeout")]
    pub timeout_ms: Option<u64>,
    pub health_requests: Option<usize>,
    #[serde(rename = "sleepTimeMS")]
    pub sleep_time_ms: Option<u64>,
    pub max_requests: Option<usize>,
    pub minimum_requests: Option<usize>,
    pub window_secs: Option<f64>,
    pub jitter_factor: Option<f64>,
}

impl ConfigOverrides {
    pub fn apply(&self, base: &Config) -> Config {
        Config {
            error_threshold: self.error_threshold.unwrap_or(base.error_threshold),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            health_requests: self.health_requests.unwrap_or(base.health_requests),
            sleep_time_ms: self.sleep_time_ms.unwrap_or(base.sleep_time_ms),
            max_requests: self.max_requests.unwrap_or(base.max_requests),
            minimum_requests: self.minimum_requests.unwrap_or(base.minimum_requests),
            window_secs: self.window_secs.unwrap_or(base.window_secs),
            jitter_factor: self.jitter_factor.unwrap_or(base.jitter_factor),
        }
    }
}

/// Breaker settings for a whole service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Configuration shared by every breaker
    #[serde(default)]
    pub defaults: Config,

    /// Overrides keyed by breaker name
    #[serde(default)]
    pub breakers: HashMap<String, ConfigOverrides>,
}

impl Settings {
    /// Parse and validate settings from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Effective configuration for the named breaker
    pub fn config_for(&self, name: &str) -> Config {
        match self.breakers.get(name) {
            Some(overrides) => overrides.apply(&self.defaults),
            None => self.defaults.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Defaults are checked under a placeholder name so an empty table
        // still reports which field is wrong.
        self.defaults.validate("defaults")?;
        for name in self.breakers.keys() {
            self.config_for(name).validate(name)?;
        }
        Ok(())
    }
}
