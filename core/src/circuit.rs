//! Circuit breaker implementation using state machines
//!
//! Counting is consecutive, not windowed: one success in Closed or HalfOpen
//! clears the failure streak, and one failure in HalfOpen reopens the circuit.
//! The Open -> HalfOpen transition is evaluated lazily when a call arrives;
//! nothing happens in the background.

use crate::{
    CircuitState, builder::CircuitBuilder, callbacks::Callbacks, clock::Clock,
    errors::CircuitError,
};
use state_machines::state_machine;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Consecutive failures in Closed that open the circuit
    pub failure_threshold: usize,

    /// Consecutive successes in HalfOpen that close the circuit
    pub success_threshold: usize,

    /// Seconds the circuit stays Open before a probe is allowed
    pub open_timeout_secs: f64,

    /// Jitter factor for open_timeout (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_secs: 60.0,
            jitter_factor: 0.0,
        }
    }
}

impl Config {
    /// Open timeout as a `Duration`
    pub fn open_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.open_timeout_secs).unwrap_or(Duration::MAX)
    }

    /// Clamp every field into its valid range
    pub(crate) fn normalized(mut self) -> Self {
        self.failure_threshold = self.failure_threshold.max(1);
        self.success_threshold = self.success_threshold.max(1);
        if !self.open_timeout_secs.is_finite() || self.open_timeout_secs < 0.0 {
            self.open_timeout_secs = 0.0;
        }
        self.jitter_factor = if self.jitter_factor.is_finite() {
            self.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}

/// Point-in-time view of a breaker, safe to read from monitoring code
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metrics {
    pub state: CircuitState,
    pub failure_count: usize,
    pub success_count: usize,
    /// Monotonic deadline set by the most recent opening (None if never opened since reset)
    pub next_attempt_at: Option<f64>,
}

/// Circuit breaker context - shared data across all states
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    /// Consecutive failure streak, shared with the machine's guards
    pub failures: Arc<AtomicUsize>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            config: Config::default(),
            clock: Arc::new(crate::MonotonicClock::new()),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("failures", &self.failures.load(Ordering::Acquire))
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: f64,
    pub next_attempt_at: f64,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub consecutive_successes: usize,
    /// Set while an admitted probe has not reported back
    pub probe_in_flight: bool,
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
    /// Failure streak has reached the threshold
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        ctx.failures.load(Ordering::Acquire) >= ctx.config.failure_threshold
    }
}

impl Circuit<HalfOpen> {
    /// A failed probe always reopens, earlier successes earn no credit
    fn should_open(&self, _ctx: &CircuitContext) -> bool {
        true
    }

    fn should_close(&self, ctx: &CircuitContext) -> bool {
        self.state_data_half_open()
            .map(|data| data.consecutive_successes >= ctx.config.success_threshold)
            .unwrap_or(false)
    }
}

impl Circuit<Open> {
    fn timeout_elapsed(&self, ctx: &CircuitContext) -> bool {
        self.state_data_open()
            .map(|data| ctx.clock.monotonic_time() >= data.next_attempt_at)
            .unwrap_or(true)
    }
}

/// Proof that a call was let through, stamped with the breaker generation.
///
/// Outcomes reported with a stale stamp (the breaker changed state while the
/// call was running) are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub(crate) struct Admission {
    generation: u64,
}

/// Circuit breaker guarding a single dependency
pub struct CircuitBreaker {
    machine: DynamicCircuit,
    context: CircuitContext,
    callbacks: Callbacks,
    next_attempt_at: Option<f64>,
    /// Bumped on every state change
    generation: u64,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("metrics", &self.metrics())
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        let context = CircuitContext {
            name: name.into(),
            config,
            ..Default::default()
        };

        Self::with_context_and_callbacks(context, Callbacks::new())
    }

    /// Create a circuit breaker with custom context and callbacks (used by builder)
    pub(crate) fn with_context_and_callbacks(
        mut context: CircuitContext,
        callbacks: Callbacks,
    ) -> Self {
        context.config = context.config.normalized();
        let machine = DynamicCircuit::new(context.clone());

        Self {
            machine,
            context,
            callbacks,
            next_attempt_at: None,
            generation: 0,
        }
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> CircuitBuilder {
        CircuitBuilder::new(name)
    }

    /// Run `action` under circuit protection
    ///
    /// Returns the action's value on success and its error, wrapped in
    /// `CircuitError::Execution`, on failure. Returns `CircuitError::Open`
    /// without calling `action` while the circuit is open.
    pub fn execute<T, E, F>(&mut self, action: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let admission = self.admit::<E>()?;
        let attempt = Attempt {
            circuit: self,
            admission: Some(admission),
        };
        let outcome = action();
        attempt.complete(outcome.is_ok());
        outcome.map_err(CircuitError::Execution)
    }

    /// Decide whether a call may proceed
    pub(crate) fn admit<E>(&mut self) -> Result<Admission, CircuitError<E>> {
        if self.machine.current_state() == "Open" {
            if self.machine.handle(CircuitEvent::AttemptReset).is_err() {
                return Err(self.reject_open());
            }
            self.generation = self.generation.wrapping_add(1);
            tracing::info!(circuit = %self.context.name, "Circuit half-open, probing for recovery");
            self.callbacks
                .entered(CircuitState::HalfOpen, &self.context.name);
        }

        if self.machine.current_state() == "HalfOpen"
            && let Some(data) = self.machine.half_open_data_mut()
        {
            if data.probe_in_flight {
                tracing::debug!(circuit = %self.context.name, "Probe already in flight, call rejected");
                self.callbacks.rejected(&self.context.name);
                return Err(CircuitError::HalfOpenLimitReached {
                    circuit: self.context.name.clone(),
                });
            }
            data.probe_in_flight = true;
        }

        Ok(Admission {
            generation: self.generation,
        })
    }

    pub(crate) fn record_success(&mut self, admission: Admission) {
        if !self.is_current(admission) {
            return;
        }

        self.context.failures.store(0, Ordering::Release);

        if self.machine.current_state() != "HalfOpen" {
            return;
        }

        if let Some(data) = self.machine.half_open_data_mut() {
            data.probe_in_flight = false;
            data.consecutive_successes += 1;
        }

        if self.machine.handle(CircuitEvent::Close).is_ok() {
            self.generation = self.generation.wrapping_add(1);
            tracing::info!(circuit = %self.context.name, "Circuit closed");
            self.callbacks.entered(CircuitState::Closed, &self.context.name);
        }
    }

    pub(crate) fn record_failure(&mut self, admission: Admission) {
        if !self.is_current(admission) {
            return;
        }

        let failures = self.context.failures.fetch_add(1, Ordering::AcqRel) + 1;

        if self.machine.handle(CircuitEvent::Trip).is_ok() {
            self.mark_open(failures);
        } else {
            tracing::debug!(
                circuit = %self.context.name,
                failures,
                threshold = self.context.config.failure_threshold,
                "Failure recorded"
            );
        }
    }

    /// Release an admission whose outcome will never be reported
    pub(crate) fn abandon(&mut self, admission: Admission) {
        if self.is_current(admission)
            && self.machine.current_state() == "HalfOpen"
            && let Some(data) = self.machine.half_open_data_mut()
        {
            data.probe_in_flight = false;
        }
    }

    /// Current state (read-only, does not trigger the lazy Open -> HalfOpen check)
    pub fn state(&self) -> CircuitState {
        CircuitState::from_machine(self.machine.current_state())
    }

    /// Snapshot of state and counters
    pub fn metrics(&self) -> Metrics {
        let success_count = if self.machine.current_state() == "HalfOpen" {
            self.machine
                .half_open_data()
                .map(|data| data.consecutive_successes)
                .unwrap_or(0)
        } else {
            0
        };

        Metrics {
            state: self.state(),
            failure_count: self.context.failures.load(Ordering::Acquire),
            success_count,
            next_attempt_at: self.next_attempt_at,
        }
    }

    pub fn is_open(&self) -> bool {
        self.machine.current_state() == "Open"
    }

    pub fn is_closed(&self) -> bool {
        self.machine.current_state() == "Closed"
    }

    pub fn is_half_open(&self) -> bool {
        self.machine.current_state() == "HalfOpen"
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Force the circuit back to Closed with zeroed counters
    ///
    /// Fires `on_close` unless the circuit was already closed.
    pub fn reset(&mut self) {
        let was_closed = self.is_closed();

        self.context.failures.store(0, Ordering::Release);
        self.machine = DynamicCircuit::new(self.context.clone());
        self.next_attempt_at = None;
        self.generation = self.generation.wrapping_add(1);
        tracing::info!(circuit = %self.context.name, "Circuit has been reset");

        if !was_closed {
            self.callbacks.entered(CircuitState::Closed, &self.context.name);
        }
    }

    fn is_current(&self, admission: Admission) -> bool {
        if admission.generation == self.generation {
            return true;
        }
        tracing::debug!(circuit = %self.context.name, "Ignoring outcome from a previous circuit state");
        false
    }

    fn reject_open<E>(&self) -> CircuitError<E> {
        let (opened_at, next_attempt_at) = self
            .machine
            .open_data()
            .map(|data| (data.opened_at, data.next_attempt_at))
            .unwrap_or((0.0, 0.0));

        tracing::warn!(circuit = %self.context.name, "Circuit is open, request rejected");
        self.callbacks.rejected(&self.context.name);

        CircuitError::Open {
            circuit: self.context.name.clone(),
            opened_at,
            next_attempt_at,
        }
    }

    /// Apply Open-state bookkeeping (deadline + callback)
    fn mark_open(&mut self, failures: usize) {
        let now = self.context.clock.monotonic_time();
        let timeout_secs = self.jittered_timeout_secs();
        let next_attempt_at = now + timeout_secs;

        if let Some(data) = self.machine.open_data_mut() {
            data.opened_at = now;
            data.next_attempt_at = next_attempt_at;
        }
        self.next_attempt_at = Some(next_attempt_at);
        self.generation = self.generation.wrapping_add(1);

        tracing::error!(
            circuit = %self.context.name,
            failures,
            timeout_secs,
            "Circuit opened, rejecting calls until timeout elapses"
        );
        self.callbacks.entered(CircuitState::Open, &self.context.name);
    }

    fn jittered_timeout_secs(&self) -> f64 {
        let config = &self.context.config;

        if config.jitter_factor > 0.0 {
            // Fed in microseconds so sub-millisecond timeouts keep their magnitude
            let timeout_us = (config.open_timeout_secs * 1_000_000.0).ceil() as u64;
            let policy = chrono_machines::Policy {
                max_attempts: 1,
                base_delay_ms: timeout_us,
                multiplier: 1.0,
                max_delay_ms: timeout_us,
            };
            let jittered_us = policy.calculate_delay(1, config.jitter_factor);
            (jittered_us as f64) / 1_000_000.0
        } else {
            config.open_timeout_secs
        }
    }
}

/// Call admitted by `CircuitBreaker::execute`, released on unwind
struct Attempt<'a> {
    circuit: &'a mut CircuitBreaker,
    admission: Option<Admission>,
}

impl Attempt<'_> {
    fn complete(mut self, success: bool) {
        if let Some(admission) = self.admission.take() {
            if success {
                self.circuit.record_success(admission);
            } else {
                self.circuit.record_failure(admission);
            }
        }
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            self.circuit.abandon(admission);
        }
    }
}
