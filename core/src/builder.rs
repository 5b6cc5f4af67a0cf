//! Builder API for circuit breaker construction
//!
//! All validation happens in [`CircuitBuilder::build`], so a misconfigured
//! breaker never reaches its first call.

use crate::{
    breaker::{CircuitBreaker, FallbackFn, RequestFn},
    callbacks::Callbacks,
    circuit::{CircuitContext, CircuitCore},
    classifier::{ErrorHandler, FailureClassifier},
    config::Config,
    errors::{CircuitError, ConfigError},
    storage::{MemoryStorage, StorageBackend},
};
use futures_util::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder<A, T, E> {
    name: String,
    config: Config,
    storage: Option<Arc<dyn StorageBackend>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
    request: Option<RequestFn<A, T, E>>,
    fallback: Option<FallbackFn<A, T, E>>,
}

impl<A, T, E> CircuitBuilder<A, T, E> {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            storage: None,
            failure_classifier: None,
            callbacks: Callbacks::new(),
            request: None,
            fallback: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Failure rate in percent (1-100) that opens the circuit
    pub fn error_threshold(mut self, percent: u8) -> Self {
        self.config.error_threshold = percent;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn timeout_ms(mut self, millis: u64) -> Self {
        self.config.timeout_ms = millis;
        self
    }

    /// Probe budget while half-open
    pub fn health_requests(mut self, probes: usize) -> Self {
        self.config.health_requests = probes;
        self
    }

    /// Minimum open duration before probing resumes
    pub fn sleep_time_ms(mut self, millis: u64) -> Self {
        self.config.sleep_time_ms = millis;
        self
    }

    /// Concurrency cap while closed (0 = unbounded)
    pub fn max_requests(mut self, limit: usize) -> Self {
        self.config.max_requests = limit;
        self
    }

    /// Outcomes required in the window before the failure rate is evaluated
    pub fn minimum_requests(mut self, calls: usize) -> Self {
        self.config.minimum_requests = calls;
        self
    }

    /// Sliding window for the failure rate, in seconds
    pub fn window_secs(mut self, seconds: f64) -> Self {
        self.config.window_secs = seconds;
        self
    }

    /// Jitter factor for the open duration (0.0 = none)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Use a custom (possibly shared) storage backend
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set a failure classifier to filter which errors should trip the circuit
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Build the circuit breaker, validating the configuration
    pub fn build(self) -> Result<CircuitBreaker<A, T, E>, ConfigError> {
        self.config.validate(&self.name)?;

        let request = self.request.ok_or_else(|| ConfigError::MissingRequest {
            circuit: self.name.clone(),
        })?;
        let fallback = self.fallback.ok_or_else(|| ConfigError::MissingFallback {
            circuit: self.name.clone(),
        })?;

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let context = CircuitContext {
            name: self.name,
            config: self.config,
            storage,
        };
        let core = Arc::new(CircuitCore::new(context, self.callbacks));

        Ok(CircuitBreaker::from_parts(
            core,
            request,
            fallback,
            self.failure_classifier,
        ))
    }
}

impl<A, T, E> CircuitBuilder<A, T, E>
where
    A: 'static,
    T: 'static,
    E: 'static,
{
    /// Bind the operation this breaker protects
    pub fn request<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.request = Some(Arc::new(move |args| f(args).boxed()));
        self
    }

    /// Handler for rejected and failed calls
    ///
    /// It receives the failure and the original arguments, and may return a
    /// recovery value, the original error or a different one.
    pub fn fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitError<E>, A) -> Result<T, E> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(f));
        self
    }

    /// Predicate over the operation's error; `true` means the error says
    /// nothing about the dependency's health and is not counted
    pub fn error_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.failure_classifier(Arc::new(ErrorHandler::new(handler)))
    }
}
