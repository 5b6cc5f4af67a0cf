//! Failure classification
//!
//! Decides whether an error returned by the wrapped operation says anything
//! about the dependency's health. Errors that do not trip the circuit are
//! still routed through the fallback; they just never touch the counters.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to the operation's error type)
    pub error: &'a dyn Any,
    /// How long the failed call ran
    pub duration: Duration,
}

/// Determines if an error should count toward opening the circuit
///
/// # Examples
///
/// ```rust
/// use outcall_breaker::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct ServerErrorClassifier;
///
/// impl FailureClassifier for ServerErrorClassifier {
///     fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
///         ctx.error
///             .downcast_ref::<u16>()
///             .map(|status| *status >= 500)
///             .unwrap_or(true)
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + fmt::Debug {
    /// Returns `true` if the error should trip the circuit, `false` to ignore it
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Default classifier that trips on all errors
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Predicate-based classifier using a closure over the whole context
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

/// Typed ignore-predicate over the operation's error
///
/// `handler(err) == true` means the error is *not* breaker-relevant, e.g. a
/// validation rejection from the remote side. Errors of any other type trip
/// the circuit.
pub struct ErrorHandler<E, F> {
    handler: F,
    _error: PhantomData<fn(&E)>,
}

impl<E, F> ErrorHandler<E, F>
where
    E: 'static,
    F: Fn(&E) -> bool + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _error: PhantomData,
        }
    }
}

impl<E, F> FailureClassifier for ErrorHandler<E, F>
where
    E: 'static,
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        match ctx.error.downcast_ref::<E>() {
            Some(err) => !(self.handler)(err),
            None => true,
        }
    }
}

impl<E, F> fmt::Debug for ErrorHandler<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("error_type", &std::any::type_name::<E>())
            .finish()
    }
}
