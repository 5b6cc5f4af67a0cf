//! Error types for circuit breaker operations

use std::time::Duration;
use thiserror::Error;

/// Errors produced while gating a call through a circuit breaker
///
/// Every variant except [`CircuitError::Execution`] is raised by the breaker
/// itself. The value is handed to the breaker's fallback, which decides what
/// the caller finally sees.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Circuit is open, calls are being rejected
    #[error("circuit '{circuit}' is open (opened at {opened_at:?})")]
    Open { circuit: String, opened_at: Duration },

    /// Half-open probe budget is exhausted
    #[error("circuit '{circuit}' half-open probe limit reached")]
    HalfOpenLimitReached { circuit: String },

    /// Too many calls in flight while closed
    #[error("circuit '{circuit}' is saturated (limit: {limit})")]
    Saturated { circuit: String, limit: usize },

    /// The wrapped operation missed its deadline
    #[error("circuit '{circuit}' call timed out after {timeout:?}")]
    Timeout { circuit: String, timeout: Duration },

    /// The wrapped operation failed
    #[error("circuit execution failed: {0}")]
    Execution(#[source] E),
}

/// Payload-free discriminant of [`CircuitError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitErrorKind {
    Open,
    HalfOpenLimitReached,
    Saturated,
    Timeout,
    Execution,
}

impl<E> CircuitError<E> {
    pub fn kind(&self) -> CircuitErrorKind {
        match self {
            CircuitError::Open { .. } => CircuitErrorKind::Open,
            CircuitError::HalfOpenLimitReached { .. } => CircuitErrorKind::HalfOpenLimitReached,
            CircuitError::Saturated { .. } => CircuitErrorKind::Saturated,
            CircuitError::Timeout { .. } => CircuitErrorKind::Timeout,
            CircuitError::Execution(_) => CircuitErrorKind::Execution,
        }
    }

    /// True when the call was refused because the circuit is not accepting traffic
    ///
    /// Covers both an open circuit and a half-open circuit with no probe
    /// budget left.
    pub fn is_circuit_open(&self) -> bool {
        matches!(
            self,
            CircuitError::Open { .. } | CircuitError::HalfOpenLimitReached { .. }
        )
    }

    /// True when the wrapped operation was never invoked
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CircuitError::Open { .. }
                | CircuitError::HalfOpenLimitReached { .. }
                | CircuitError::Saturated { .. }
        )
    }

    /// Name of the circuit that raised the error, if the breaker raised it
    pub fn circuit(&self) -> Option<&str> {
        match self {
            CircuitError::Open { circuit, .. }
            | CircuitError::HalfOpenLimitReached { circuit }
            | CircuitError::Saturated { circuit, .. }
            | CircuitError::Timeout { circuit, .. } => Some(circuit),
            CircuitError::Execution(_) => None,
        }
    }

    /// Recover the wrapped operation's error
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors raised while constructing or configuring breakers
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("circuit name must not be empty")]
    EmptyName,

    #[error("circuit '{circuit}': errorThreshold must be within 1..=100, got {value}")]
    InvalidErrorThreshold { circuit: String, value: u8 },

    #[error("circuit '{circuit}': timeout must be greater than 0")]
    ZeroTimeout { circuit: String },

    #[error("circuit '{circuit}': healthRequests must be at least 1")]
    ZeroHealthRequests { circuit: String },

    #[error("circuit '{circuit}': minimumRequests must be at least 1")]
    ZeroMinimumRequests { circuit: String },

    #[error("circuit '{circuit}': windowSecs must be a positive, representable duration, got {value}")]
    InvalidWindow { circuit: String, value: f64 },

    #[error("circuit '{circuit}': jitterFactor must be within 0.0..=1.0, got {value}")]
    InvalidJitter { circuit: String, value: f64 },

    #[error("circuit '{circuit}' has no request operation")]
    MissingRequest { circuit: String },

    #[error("circuit '{circuit}' has no fallback")]
    MissingFallback { circuit: String },

    #[error("circuit '{0}' is already registered")]
    DuplicateName(String),

    #[error("failed to read breaker settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse breaker settings: {0}")]
    Parse(#[from] toml::de::Error),
}
