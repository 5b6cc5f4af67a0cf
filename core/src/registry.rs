//! Construction root for a service's breakers
//!
//! A service owns one registry and builds every breaker through it at
//! startup. The registry applies configured settings per name, refuses
//! duplicate names and keeps a type-erased handle to each circuit for
//! health reporting and operational resets.

use crate::{
    breaker::CircuitBreaker,
    builder::CircuitBuilder,
    circuit::{BreakerStatus, CircuitCore},
    config::Settings,
    errors::ConfigError,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

#[derive(Debug, Default)]
pub struct BreakerRegistry {
    settings: Settings,
    circuits: Mutex<BTreeMap<String, Arc<CircuitCore>>>,
}

impl BreakerRegistry {
    /// Registry whose breakers start from [`crate::Config::default`]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            circuits: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Settings::from_toml_str(content).map(Self::with_settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Settings::load(path).map(Self::with_settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Builder pre-loaded with the configured settings for `name`
    pub fn builder<A, T, E>(&self, name: &str) -> CircuitBuilder<A, T, E> {
        CircuitBuilder::new(name).config(self.settings.config_for(name))
    }

    /// Build a breaker and record it under its name
    pub fn register<A, T, E>(
        &self,
        builder: CircuitBuilder<A, T, E>,
    ) -> Result<CircuitBreaker<A, T, E>, ConfigError> {
        let mut circuits = self.circuits();
        if circuits.contains_key(builder.name()) {
            return Err(ConfigError::DuplicateName(builder.name().to_string()));
        }

        let breaker = builder.build()?;
        circuits.insert(breaker.name().to_string(), Arc::clone(breaker.core()));
        info!(
            circuit = %breaker.name(),
            error_threshold = breaker.config().error_threshold,
            timeout_ms = breaker.config().timeout_ms,
            "circuit registered"
        );
        Ok(breaker)
    }

    pub fn status(&self, name: &str) -> Option<BreakerStatus> {
        self.circuits().get(name).map(|core| core.status())
    }

    /// Snapshots of every breaker, ordered by name
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        self.circuits().values().map(|core| core.status()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.circuits().keys().cloned().collect()
    }

    /// Reset the named breaker; returns false if no such breaker exists
    pub fn reset(&self, name: &str) -> bool {
        let core = self.circuits().get(name).cloned();
        match core {
            Some(core) => {
                core.reset();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.circuits().len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits().is_empty()
    }

    fn circuits(&self) -> MutexGuard<'_, BTreeMap<String, Arc<CircuitCore>>> {
        self.circuits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
