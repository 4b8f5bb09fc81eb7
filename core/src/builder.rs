//! Builder API for ergonomic circuit breaker configuration

use crate::{
    MonotonicClock,
    callbacks::Callbacks,
    circuit::{CircuitBreaker, CircuitContext, Config},
    clock::Clock,
    shared::SharedCircuitBreaker,
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            clock: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration at once
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the number of consecutive failures that opens the circuit (min 1)
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.config.failure_threshold = threshold.max(1);
        self
    }

    /// Set the number of half-open successes that closes the circuit (min 1)
    pub fn success_threshold(mut self, threshold: usize) -> Self {
        self.config.success_threshold = threshold.max(1);
        self
    }

    /// Set how long the circuit stays open before probing
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_timeout_secs = timeout.as_secs_f64();
        self
    }

    /// Set the open timeout in seconds
    pub fn open_timeout_secs(mut self, seconds: f64) -> Self {
        self.config.open_timeout_secs = seconds;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Set the time source (defaults to `MonotonicClock`)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for calls rejected without running
    pub fn on_reject<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_reject = Some(Arc::new(f));
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> CircuitBreaker {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        let context = CircuitContext {
            name: self.name,
            config: self.config,
            clock,
            failures: Arc::new(AtomicUsize::new(0)),
        };

        CircuitBreaker::with_context_and_callbacks(context, self.callbacks)
    }

    /// Build a cloneable, thread-safe handle
    pub fn build_shared(self) -> SharedCircuitBreaker {
        SharedCircuitBreaker::new(self.build())
    }
}
