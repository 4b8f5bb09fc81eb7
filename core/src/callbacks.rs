//! Hooks fired on state transitions and rejections

use crate::CircuitState;
use std::sync::Arc;

/// Hook receiving the circuit name
pub type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// Observers for breaker lifecycle events
///
/// Hooks run synchronously on the calling thread while the breaker is being
/// mutated, so they should be cheap (bump a counter, emit a log line).
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<Hook>,
    pub on_half_open: Option<Hook>,
    pub on_close: Option<Hook>,
    pub on_reject: Option<Hook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the hook registered for entering `state`
    pub fn entered(&self, state: CircuitState, circuit: &str) {
        let hook = match state {
            CircuitState::Open => &self.on_open,
            CircuitState::HalfOpen => &self.on_half_open,
            CircuitState::Closed => &self.on_close,
        };
        fire(hook, circuit);
    }

    pub fn rejected(&self, circuit: &str) {
        fire(&self.on_reject, circuit);
    }
}

fn fire(hook: &Option<Hook>, circuit: &str) {
    if let Some(callback) = hook {
        callback(circuit);
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_reject", &self.on_reject.is_some())
            .finish()
    }
}
