//! Circuit state machine and the admission/settlement core
//!
//! All mutable breaker state (the state machine, half-open probe counters
//! and the epoch) sits behind one mutex. Admission decides and claims in a
//! single critical section; settlement records an outcome and drives the
//! resulting transition in another. The wrapped call runs outside the lock.
//!
//! Every transition advances the epoch. An admission remembers the epoch it
//! was granted in, and its outcome is discarded if the circuit has moved on
//! since, so a call that straddles a transition can never be counted
//! against the wrong episode.

use crate::{
    bulkhead::{Bulkhead, BulkheadGuard},
    callbacks::{Callbacks, StateChange},
    config::Config,
    errors::CircuitError,
    storage::{MemoryStorage, StorageBackend},
};
use serde::Serialize;
use state_machines::state_machine;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Public view of the circuit's lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn from_machine(name: &str) -> Self {
        match name {
            "Open" => BreakerState::Open,
            "HalfOpen" => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "Closed",
            BreakerState::Open => "Open",
            BreakerState::HalfOpen => "HalfOpen",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time snapshot of a breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: BreakerState,
    pub in_flight: usize,
    /// Monotonic time of the last trip, while open
    pub opened_at: Option<Duration>,
}

/// Circuit context - shared data across all states
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub storage: Arc<dyn StorageBackend>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            config: Config::default(),
            storage: Arc::new(MemoryStorage::new()),
        }
    }
}

impl fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("storage", &"<dyn StorageBackend>")
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: Duration,
    /// Open duration drawn for this episode (sleepTimeMS plus any jitter)
    pub sleep: Duration,
}

/// Probe bookkeeping for one half-open episode
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub admitted: usize,
    pub successes: usize,
    pub failures: usize,
}

state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [timeout_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

impl Circuit<Closed> {
    /// Failure rate over the window has reached the threshold
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        let window = ctx.config.window();
        let failures = ctx.storage.failure_count(&ctx.name, window);
        let attempts = failures + ctx.storage.success_count(&ctx.name, window);

        attempts >= ctx.config.minimum_requests
            && failures * 100 >= usize::from(ctx.config.error_threshold) * attempts
    }
}

impl Circuit<HalfOpen> {
    /// Any relevant probe failure reopens the circuit
    fn should_open(&self, _ctx: &CircuitContext) -> bool {
        self.state_data_half_open()
            .map(|data| data.failures > 0)
            .unwrap_or(false)
    }

    /// The whole probe budget succeeded
    fn should_close(&self, ctx: &CircuitContext) -> bool {
        self.state_data_half_open()
            .map(|data| data.successes >= ctx.config.health_requests)
            .unwrap_or(false)
    }
}

impl Circuit<Open> {
    fn timeout_elapsed(&self, ctx: &CircuitContext) -> bool {
        match self.state_data_open() {
            Some(data) => ctx.storage.monotonic_time().saturating_sub(data.opened_at) >= data.sleep,
            None => true,
        }
    }
}

/// Open duration for a new episode
///
/// chrono-machines draws from `[base * (1 - jitter), base]`; the draw is
/// mirrored above `base` so jitter never shortens the configured sleep.
fn open_duration(config: &Config) -> Duration {
    let base_ms = config.sleep_time_ms;
    if config.jitter_factor <= 0.0 || base_ms == 0 {
        return Duration::from_millis(base_ms);
    }

    let policy = chrono_machines::Policy {
        max_attempts: 1,
        base_delay_ms: base_ms,
        multiplier: 1.0,
        max_delay_ms: base_ms,
    };
    let drawn = policy.calculate_delay(1, config.jitter_factor).min(base_ms);
    Duration::from_millis(base_ms.saturating_add(base_ms - drawn))
}

/// How an admitted call ended
#[derive(Debug, Clone, Copy)]
pub(crate) enum CallOutcome {
    Success(Duration),
    /// Breaker-relevant failure (timeout or classified error)
    Failure(Duration),
    /// Error excluded by the classifier
    Ignored,
    /// Caller dropped the call before it finished
    Abandoned,
}

struct Gate {
    machine: DynamicCircuit,
    epoch: u64,
}

/// Non-generic heart of a breaker, shared with the registry
pub(crate) struct CircuitCore {
    context: CircuitContext,
    gate: Mutex<Gate>,
    bulkhead: Arc<Bulkhead>,
    callbacks: Callbacks,
}

impl CircuitCore {
    pub(crate) fn new(context: CircuitContext, callbacks: Callbacks) -> Self {
        let machine = DynamicCircuit::new(context.clone());
        let bulkhead = Arc::new(Bulkhead::new(context.config.max_requests));

        Self {
            context,
            gate: Mutex::new(Gate { machine, epoch: 0 }),
            bulkhead,
            callbacks,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.context.name
    }

    pub(crate) fn config(&self) -> &Config {
        &self.context.config
    }

    pub(crate) fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.context.storage
    }

    pub(crate) fn state(&self) -> BreakerState {
        BreakerState::from_machine(self.lock_gate().machine.current_state())
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.bulkhead.in_flight()
    }

    pub(crate) fn status(&self) -> BreakerStatus {
        let gate = self.lock_gate();
        let state = BreakerState::from_machine(gate.machine.current_state());
        let opened_at = match state {
            BreakerState::Open => gate.machine.open_data().map(|data| data.opened_at),
            _ => None,
        };

        BreakerStatus {
            name: self.context.name.clone(),
            state,
            in_flight: self.bulkhead.in_flight(),
            opened_at,
        }
    }

    /// Decide whether a call may run and claim its slot
    pub(crate) fn admit<E>(&self) -> Result<Admission<'_>, CircuitError<E>> {
        let name = &self.context.name;
        let mut transition = None;

        let decision = {
            let mut gate = self.lock_gate();

            if gate.machine.current_state() == "Open"
                && gate.machine.handle(CircuitEvent::AttemptReset).is_ok()
            {
                if let Some(data) = gate.machine.half_open_data_mut() {
                    *data = HalfOpenData::default();
                }
                gate.epoch += 1;
                info!(
                    circuit = %name,
                    probes = self.context.config.health_requests,
                    "circuit half-open, admitting probes"
                );
                transition = Some(StateChange::HalfOpened);
            }

            let epoch = gate.epoch;
            match gate.machine.current_state() {
                "Open" => {
                    let opened_at = gate
                        .machine
                        .open_data()
                        .map(|data| data.opened_at)
                        .unwrap_or_default();
                    debug!(circuit = %name, "call rejected, circuit open");
                    Err(CircuitError::Open {
                        circuit: name.clone(),
                        opened_at,
                    })
                }
                "HalfOpen" => {
                    let budget = self.context.config.health_requests;
                    let claimed = match gate.machine.half_open_data_mut() {
                        Some(data) if data.admitted < budget => {
                            data.admitted += 1;
                            true
                        }
                        _ => false,
                    };

                    if claimed {
                        Ok(Admission::new(self, epoch, self.bulkhead.enter()))
                    } else {
                        debug!(circuit = %name, budget, "call rejected, probe budget exhausted");
                        Err(CircuitError::HalfOpenLimitReached {
                            circuit: name.clone(),
                        })
                    }
                }
                _ => match self.bulkhead.try_acquire() {
                    Some(slot) => Ok(Admission::new(self, epoch, slot)),
                    None => {
                        debug!(
                            circuit = %name,
                            limit = self.bulkhead.limit(),
                            "call rejected, breaker saturated"
                        );
                        Err(CircuitError::Saturated {
                            circuit: name.clone(),
                            limit: self.bulkhead.limit(),
                        })
                    }
                },
            }
        };

        if let Some(transition) = transition {
            self.callbacks.trigger(transition, name);
        }
        decision
    }

    /// Record the outcome of a call admitted in `epoch`
    fn settle(&self, epoch: u64, outcome: CallOutcome) {
        let name = &self.context.name;

        let transition = {
            let mut gate = self.lock_gate();
            if gate.epoch != epoch {
                trace!(circuit = %name, ?outcome, "discarding outcome from a previous episode");
                return;
            }

            match (gate.machine.current_state(), outcome) {
                ("Closed", CallOutcome::Success(duration)) => {
                    self.context.storage.record_success(name, duration);
                    self.try_trip(&mut gate)
                }
                ("Closed", CallOutcome::Failure(duration)) => {
                    self.context.storage.record_failure(name, duration);
                    self.try_trip(&mut gate)
                }
                ("HalfOpen", CallOutcome::Success(_)) => {
                    if let Some(data) = gate.machine.half_open_data_mut() {
                        data.successes += 1;
                    }
                    self.try_close(&mut gate)
                }
                ("HalfOpen", CallOutcome::Failure(_)) => {
                    if let Some(data) = gate.machine.half_open_data_mut() {
                        data.failures += 1;
                    }
                    self.try_trip(&mut gate)
                }
                ("HalfOpen", CallOutcome::Ignored | CallOutcome::Abandoned) => {
                    // Hand the probe slot back so the episode can still reach a verdict
                    if let Some(data) = gate.machine.half_open_data_mut() {
                        data.admitted = data.admitted.saturating_sub(1);
                    }
                    None
                }
                _ => None,
            }
        };

        if let Some(transition) = transition {
            self.callbacks.trigger(transition, name);
        }
    }

    fn try_trip(&self, gate: &mut Gate) -> Option<StateChange> {
        let from = gate.machine.current_state();
        if gate.machine.handle(CircuitEvent::Trip).is_err() {
            return None;
        }

        let name = &self.context.name;
        let config = &self.context.config;
        let sleep = open_duration(config);
        if let Some(data) = gate.machine.open_data_mut() {
            data.opened_at = self.context.storage.monotonic_time();
            data.sleep = sleep;
        }

        if from == "Closed" {
            let window = config.window();
            let failures = self.context.storage.failure_count(name, window);
            let attempts = failures + self.context.storage.success_count(name, window);
            warn!(
                circuit = %name,
                failures,
                attempts,
                threshold = config.error_threshold,
                ?sleep,
                "circuit opened"
            );
        } else {
            warn!(circuit = %name, ?sleep, "probe failed, circuit reopened");
        }

        self.context.storage.clear(name);
        gate.epoch += 1;
        Some(StateChange::Opened)
    }

    fn try_close(&self, gate: &mut Gate) -> Option<StateChange> {
        if gate.machine.handle(CircuitEvent::Close).is_err() {
            return None;
        }

        self.context.storage.clear(&self.context.name);
        gate.epoch += 1;
        info!(circuit = %self.context.name, "circuit closed");
        Some(StateChange::Closed)
    }

    /// Force the circuit back to Closed with empty statistics
    pub(crate) fn reset(&self) {
        let was_closed = {
            let mut gate = self.lock_gate();
            let was_closed = gate.machine.current_state() == "Closed";
            gate.machine = DynamicCircuit::new(self.context.clone());
            gate.epoch += 1;
            self.context.storage.clear(&self.context.name);
            was_closed
        };

        info!(circuit = %self.context.name, "circuit reset");
        if !was_closed {
            self.callbacks.trigger(StateChange::Closed, &self.context.name);
        }
    }

    fn lock_gate(&self) -> MutexGuard<'_, Gate> {
        // Every critical section leaves the gate consistent, so a poisoned
        // lock only means a user hook panicked elsewhere.
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CircuitCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitCore")
            .field("context", &self.context)
            .field("state", &self.state())
            .field("bulkhead", &self.bulkhead)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// A granted call slot
///
/// Dropping an unsettled admission (the caller cancelled) releases its probe
/// slot without recording anything.
#[must_use]
pub(crate) struct Admission<'a> {
    core: &'a CircuitCore,
    epoch: u64,
    settled: bool,
    _slot: BulkheadGuard,
}

impl<'a> Admission<'a> {
    fn new(core: &'a CircuitCore, epoch: u64, slot: BulkheadGuard) -> Self {
        Self {
            core,
            epoch,
            settled: false,
            _slot: slot,
        }
    }

    pub(crate) fn succeed(self, duration: Duration) {
        self.finish(CallOutcome::Success(duration));
    }

    pub(crate) fn fail(self, duration: Duration) {
        self.finish(CallOutcome::Failure(duration));
    }

    pub(crate) fn ignore(self) {
        self.finish(CallOutcome::Ignored);
    }

    fn finish(mut self, outcome: CallOutcome) {
        self.settled = true;
        self.core.settle(self.epoch, outcome);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.core.settle(self.epoch, CallOutcome::Abandoned);
        }
    }
}
