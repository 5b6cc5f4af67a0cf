//! The public breaker: a bound operation, a fallback and the gate between them

use crate::{
    circuit::{BreakerState, BreakerStatus, CircuitCore},
    classifier::{FailureClassifier, FailureContext},
    config::Config,
    errors::CircuitError,
};
use futures_util::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// The wrapped operation, invoked with the arguments given to `execute`
pub type RequestFn<A, T, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Invoked with the failure and the original arguments whenever the wrapped
/// operation is not attempted or does not succeed
pub type FallbackFn<A, T, E> = Arc<dyn Fn(CircuitError<E>, A) -> Result<T, E> + Send + Sync>;

/// Circuit breaker around one kind of outbound call
///
/// Cloning is cheap and every clone shares the same circuit.
///
/// # Example
///
/// ```rust
/// use outcall_breaker::{CircuitBreaker, CircuitError};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let breaker = CircuitBreaker::builder("productsRetrieveProducts")
///     .error_threshold(20)
///     .timeout_ms(20_000)
///     .request(|ids: Vec<String>| async move { Ok::<_, String>(ids.len()) })
///     .fallback(|err: CircuitError<String>, _ids| match err {
///         CircuitError::Execution(e) => Err(e),
///         other => Err(format!("service unavailable: {}", other)),
///     })
///     .build()?;
///
/// let count = breaker.execute(vec!["a".into(), "b".into()]).await?;
/// assert_eq!(count, 2);
/// # Ok(())
/// # }
/// ```
pub struct CircuitBreaker<A, T, E> {
    core: Arc<CircuitCore>,
    request: RequestFn<A, T, E>,
    fallback: FallbackFn<A, T, E>,
    classifier: Option<Arc<dyn FailureClassifier>>,
}

impl<A, T, E> CircuitBreaker<A, T, E> {
    pub(crate) fn from_parts(
        core: Arc<CircuitCore>,
        request: RequestFn<A, T, E>,
        fallback: FallbackFn<A, T, E>,
        classifier: Option<Arc<dyn FailureClassifier>>,
    ) -> Self {
        Self {
            core,
            request,
            fallback,
            classifier,
        }
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder<A, T, E> {
        crate::builder::CircuitBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn config(&self) -> &Config {
        self.core.config()
    }

    pub fn state(&self) -> BreakerState {
        self.core.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == BreakerState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == BreakerState::HalfOpen
    }

    /// Calls currently executing through this breaker
    pub fn in_flight(&self) -> usize {
        self.core.in_flight()
    }

    pub fn status(&self) -> BreakerStatus {
        self.core.status()
    }

    /// Clear statistics and force the circuit closed
    pub fn reset(&self) {
        self.core.reset();
    }

    pub(crate) fn core(&self) -> &Arc<CircuitCore> {
        &self.core
    }
}

impl<A, T, E> CircuitBreaker<A, T, E>
where
    A: Clone + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    /// Run the bound operation with circuit protection
    ///
    /// On success the operation's value is returned unchanged. Every other
    /// path (rejection, timeout, error) goes through the fallback, whose
    /// result becomes the caller's result. Exactly one outcome is produced
    /// per call and the breaker never retries.
    pub async fn execute(&self, args: A) -> Result<T, E> {
        let admission = match self.core.admit::<E>() {
            Ok(admission) => admission,
            Err(rejection) => return (self.fallback)(rejection, args),
        };

        let storage = self.core.storage();
        let timeout = self.core.config().timeout();
        let started = storage.monotonic_time();

        let call = (self.request)(args.clone());
        // On expiry the request future is dropped, so a late result can
        // never reach the breaker.
        let result = tokio::time::timeout(timeout, call).await;
        let duration = storage.monotonic_time().saturating_sub(started);

        match result {
            Ok(Ok(value)) => {
                admission.succeed(duration);
                Ok(value)
            }
            Ok(Err(error)) => {
                if self.should_trip(&error, duration) {
                    admission.fail(duration);
                } else {
                    trace!(circuit = %self.name(), "error excluded from circuit health");
                    admission.ignore();
                }
                (self.fallback)(CircuitError::Execution(error), args)
            }
            Err(_elapsed) => {
                admission.fail(duration);
                let error = CircuitError::Timeout {
                    circuit: self.name().to_string(),
                    timeout,
                };
                (self.fallback)(error, args)
            }
        }
    }

    fn should_trip(&self, error: &E, duration: std::time::Duration) -> bool {
        match &self.classifier {
            Some(classifier) => classifier.should_trip(&FailureContext {
                circuit_name: self.name(),
                error: error as &dyn Any,
                duration,
            }),
            None => true,
        }
    }
}

impl<A, T, E> Clone for CircuitBreaker<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            request: Arc::clone(&self.request),
            fallback: Arc::clone(&self.fallback),
            classifier: self.classifier.clone(),
        }
    }
}

impl<A, T, E> fmt::Debug for CircuitBreaker<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("core", &self.core)
            .field("classifier", &self.classifier)
            .finish_non_exhaustive()
    }
}
