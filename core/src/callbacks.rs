//! Hooks fired on circuit state transitions

use std::fmt;
use std::sync::Arc;

pub type TransitionHook = Arc<dyn Fn(&str) + Send + Sync>;

/// A state change the breaker has just completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// Closed or HalfOpen -> Open
    Opened,
    /// Open -> HalfOpen
    HalfOpened,
    /// HalfOpen -> Closed, or a manual reset
    Closed,
}

/// Optional user hooks, one per transition
///
/// Hooks run after the breaker has released its internal lock, so they may
/// freely query the breaker they belong to.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<TransitionHook>,
    pub on_close: Option<TransitionHook>,
    pub on_half_open: Option<TransitionHook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, transition: StateChange, circuit: &str) {
        let hook = match transition {
            StateChange::Opened => &self.on_open,
            StateChange::HalfOpened => &self.on_half_open,
            StateChange::Closed => &self.on_close,
        };
        if let Some(callback) = hook {
            callback(circuit);
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
