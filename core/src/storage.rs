//! Outcome storage for the closed-state failure window
//!
//! `MemoryStorage` keeps a bounded, per-circuit log of breaker-relevant
//! outcomes and answers sliding-window counts over it. Timestamps come from
//! a monotonic clock anchored at storage creation, so wall-clock adjustments
//! never move a window.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Event type recorded for a completed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Success,
    Failure,
}

/// A single outcome recorded by the circuit breaker
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    /// Monotonic time of the outcome, relative to storage creation
    pub timestamp: Duration,
    pub duration: Duration,
}

/// Abstract storage backend for circuit breaker outcomes
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Record a successful operation
    fn record_success(&self, circuit_name: &str, duration: Duration);

    /// Record a breaker-relevant failure
    fn record_failure(&self, circuit_name: &str, duration: Duration);

    /// Count successful operations within a time window
    fn success_count(&self, circuit_name: &str, window: Duration) -> usize;

    /// Count failed operations within a time window
    fn failure_count(&self, circuit_name: &str, window: Duration) -> usize;

    /// Clear all events for a circuit
    fn clear(&self, circuit_name: &str);

    /// Get monotonic time (relative to storage creation)
    fn monotonic_time(&self) -> Duration;
}

/// Thread-safe in-memory storage for circuit breaker outcomes
#[derive(Debug)]
pub struct MemoryStorage {
    /// Events keyed by circuit name
    events: RwLock<HashMap<String, Vec<Event>>>,
    /// Maximum events to keep per circuit
    max_events: usize,
    start_time: Instant,
}

impl MemoryStorage {
    /// Create a new storage instance
    pub fn new() -> Self {
        Self::with_max_events(1000)
    }

    /// Create storage with custom max events per circuit
    pub fn with_max_events(max_events: usize) -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            max_events: max_events.max(1),
            start_time: Instant::now(),
        }
    }

    fn record_event(&self, circuit_name: &str, kind: EventKind, duration: Duration) {
        let timestamp = self.monotonic_time();
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        let circuit_events = events.entry(circuit_name.to_string()).or_default();

        circuit_events.push(Event {
            kind,
            timestamp,
            duration,
        });

        // Trim the oldest 10% at once rather than on every push
        if circuit_events.len() > self.max_events {
            let remove_count = (self.max_events / 10).max(1);
            circuit_events.drain(0..remove_count);
        }
    }

    fn count_events(&self, circuit_name: &str, kind: EventKind, window: Duration) -> usize {
        let cutoff = self.monotonic_time().saturating_sub(window);
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);

        events
            .get(circuit_name)
            .map(|ev| {
                ev.iter()
                    .filter(|e| e.kind == kind && e.timestamp >= cutoff)
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryStorage {
    fn record_success(&self, circuit_name: &str, duration: Duration) {
        self.record_event(circuit_name, EventKind::Success, duration);
    }

    fn record_failure(&self, circuit_name: &str, duration: Duration) {
        self.record_event(circuit_name, EventKind::Failure, duration);
    }

    fn success_count(&self, circuit_name: &str, window: Duration) -> usize {
        self.count_events(circuit_name, EventKind::Success, window)
    }

    fn failure_count(&self, circuit_name: &str, window: Duration) -> usize {
        self.count_events(circuit_name, EventKind::Failure, window)
    }

    fn clear(&self, circuit_name: &str) {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        events.remove(circuit_name);
    }

    fn monotonic_time(&self) -> Duration {
        self.start_time.elapsed()
    }
}
