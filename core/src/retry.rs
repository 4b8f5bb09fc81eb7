//! Bounded retry layered on top of a breaker
//!
//! The breaker never retries by itself. `RetryPolicy` re-runs an action a
//! bounded number of times with a delay between attempts, and gives up at
//! once when the breaker rejects the call: a rejection means the dependency
//! is already known to be down.

use crate::{circuit::CircuitBreaker, errors::CircuitError, shared::SharedCircuitBreaker};
use std::thread;
use std::time::Duration;

/// Retry schedule for reconnect-style loops
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    /// Growth factor applied per failed attempt (1.0 = constant delay)
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 = no jitter, 1.0 = full jitter)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 5000,
            multiplier: 1.0,
            max_delay_ms: 5000,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Constant delay between attempts
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        let delay_ms = delay.as_millis().min(u64::MAX as u128) as u64;
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: delay_ms,
            multiplier: 1.0,
            max_delay_ms: delay_ms,
            jitter_factor: 0.0,
        }
    }

    /// Grow the delay by `multiplier` per attempt, up to `max_delay`
    pub fn with_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.multiplier = multiplier.max(1.0);
        self.max_delay_ms = max_delay.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait after the `attempt`-th failure (1-based)
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let raw_ms = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped_ms = raw_ms.min(self.max_delay_ms.max(self.base_delay_ms) as f64) as u64;

        let delay_ms = if self.jitter_factor > 0.0 {
            let policy = chrono_machines::Policy {
                max_attempts: 1,
                base_delay_ms: capped_ms,
                multiplier: 1.0,
                max_delay_ms: capped_ms,
            };
            policy.calculate_delay(1, self.jitter_factor) as u64
        } else {
            capped_ms
        };

        Duration::from_millis(delay_ms)
    }

    /// Retry `action` through an exclusively owned breaker
    pub fn run<T, E, F>(
        &self,
        circuit: &mut CircuitBreaker,
        mut action: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        let name = circuit.name().to_string();
        self.drive(&name, || circuit.execute(&mut action))
    }

    /// Retry `action` through a shared breaker handle
    pub fn run_shared<T, E, F>(
        &self,
        circuit: &SharedCircuitBreaker,
        mut action: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.drive(&circuit.name(), || circuit.execute(&mut action))
    }

    fn drive<T, E>(
        &self,
        circuit: &str,
        mut attempt_once: impl FnMut() -> Result<T, CircuitError<E>>,
    ) -> Result<T, CircuitError<E>> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match attempt_once() {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(circuit = %circuit, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_rejection() => {
                    tracing::warn!(circuit = %circuit, attempt, "Circuit rejected call, not retrying");
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    tracing::error!(circuit = %circuit, attempts = attempt, "Max attempts reached");
                    return Err(e);
                }
                Err(_) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        circuit = %circuit,
                        attempt,
                        max_attempts,
                        delay = ?delay,
                        "Attempt failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use std::sync::Arc;

    fn quick(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_default_matches_reconnect_loop() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(6, Duration::from_millis(100))
            .with_backoff(2.0, Duration::from_millis(1000));

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000)).with_jitter(0.5);

        for attempt in 1..=20 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= Duration::from_millis(490), "{:?} too short", delay);
            assert!(delay <= Duration::from_millis(1010), "{:?} too long", delay);
        }
    }

    #[test]
    fn test_run_succeeds_after_transient_failures() {
        let mut circuit = CircuitBreaker::builder("db").failure_threshold(5).build();
        let mut calls = 0;

        let result = quick(5).run(&mut circuit, || {
            calls += 1;
            if calls < 3 {
                Err("connection refused")
            } else {
                Ok("connected")
            }
        });

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(calls, 3);
        assert!(circuit.is_closed());
        assert_eq!(circuit.metrics().failure_count, 0);
    }

    #[test]
    fn test_run_returns_last_upstream_error() {
        let mut circuit = CircuitBreaker::builder("db").failure_threshold(10).build();
        let mut calls = 0;

        let result = quick(3).run(&mut circuit, || {
            calls += 1;
            Err::<(), _>(format!("failure {}", calls))
        });

        match result {
            Err(CircuitError::Execution(e)) => assert_eq!(e, "failure 3"),
            other => panic!("Expected Execution error, got: {:?}", other),
        }
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_run_stops_on_open_circuit() {
        let mut circuit = CircuitBreaker::builder("prisma-database")
            .failure_threshold(2)
            .clock(Arc::new(ManualClock::new()))
            .build();
        let mut calls = 0;

        let result = quick(5).run(&mut circuit, || {
            calls += 1;
            Err::<(), _>("connection refused")
        });

        assert!(matches!(result, Err(CircuitError::Open { .. })));
        assert_eq!(calls, 2, "Rejections must not be retried");
        assert!(circuit.is_open());
    }

    #[test]
    fn test_run_shared() {
        let shared = CircuitBreaker::builder("cache")
            .failure_threshold(3)
            .build_shared();
        let mut calls = 0;

        let result = quick(4).run_shared(&shared, || {
            calls += 1;
            if calls == 1 { Err("READONLY") } else { Ok(calls) }
        });

        assert_eq!(result.unwrap(), 2);
        assert!(shared.is_closed());
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let mut circuit = CircuitBreaker::builder("db").build();
        let policy = RetryPolicy {
            max_attempts: 0,
            ..quick(1)
        };

        let mut calls = 0;
        let _ = policy.run(&mut circuit, || {
            calls += 1;
            Err::<(), _>("down")
        });
        assert_eq!(calls, 1);
    }
}
