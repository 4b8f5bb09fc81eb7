//! Thread-safe handle for a breaker shared across threads and tasks
//!
//! Admission and outcome recording each run under the mutex; the guarded
//! action runs outside it, so slow calls never serialize each other. While
//! half-open only one probe is admitted at a time, the rest are rejected
//! with `CircuitError::HalfOpenLimitReached`.

use crate::{
    CircuitState,
    circuit::{Admission, CircuitBreaker, Metrics},
    errors::CircuitError,
};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cloneable handle to one breaker
#[derive(Debug, Clone)]
pub struct SharedCircuitBreaker {
    inner: Arc<Mutex<CircuitBreaker>>,
}

impl SharedCircuitBreaker {
    pub fn new(circuit: CircuitBreaker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(circuit)),
        }
    }

    /// Run a synchronous action under circuit protection
    pub fn execute<T, E, F>(&self, action: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.admit::<E>()?;
        let outcome = action();
        permit.complete(outcome.is_ok());
        outcome.map_err(CircuitError::Execution)
    }

    /// Run an async action under circuit protection
    ///
    /// The lock is never held across the action's `.await`. Dropping the
    /// returned future before it finishes records no outcome.
    pub async fn execute_async<T, E, F, Fut>(&self, action: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.admit::<E>()?;
        let outcome = action().await;
        permit.complete(outcome.is_ok());
        outcome.map_err(CircuitError::Execution)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state()
    }

    pub fn metrics(&self) -> Metrics {
        self.lock().metrics()
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_closed()
    }

    pub fn is_half_open(&self) -> bool {
        self.lock().is_half_open()
    }

    pub fn name(&self) -> String {
        self.lock().name().to_string()
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    fn admit<E>(&self) -> Result<Permit<'_>, CircuitError<E>> {
        let admission = self.lock().admit::<E>()?;
        Ok(Permit {
            circuit: self,
            admission: Some(admission),
        })
    }

    // The breaker only holds counters, a panic mid-update cannot leave it unusable
    fn lock(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<CircuitBreaker> for SharedCircuitBreaker {
    fn from(circuit: CircuitBreaker) -> Self {
        Self::new(circuit)
    }
}

/// Admitted call awaiting its outcome
///
/// Dropped without `complete` (panic, cancelled future) it releases any
/// half-open probe slot it holds.
struct Permit<'a> {
    circuit: &'a SharedCircuitBreaker,
    admission: Option<Admission>,
}

impl Permit<'_> {
    fn complete(mut self, success: bool) {
        if let Some(admission) = self.admission.take() {
            let mut circuit = self.circuit.lock();
            if success {
                circuit.record_success(admission);
            } else {
                circuit.record_failure(admission);
            }
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            self.circuit.lock().abandon(admission);
        }
    }
}
