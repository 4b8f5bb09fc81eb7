//! Time sources for circuit breaker deadlines
//!
//! This module provides two clocks:
//! - `MonotonicClock`: wall-independent time anchored at creation
//! - `ManualClock`: explicitly advanced clock for deterministic tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic time for deadline calculations
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Seconds elapsed since the clock's own anchor point
    fn monotonic_time(&self) -> f64;
}

/// Monotonic clock backed by `Instant` (immune to NTP adjustments)
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start_time: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn monotonic_time(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to
///
/// Lets timeout behaviour be exercised without sleeping.
///
/// # Example
///
/// ```rust
/// use resource_guard::{CircuitBreaker, ManualClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(ManualClock::new());
/// let mut circuit = CircuitBreaker::builder("db")
///     .failure_threshold(1)
///     .open_timeout(Duration::from_secs(30))
///     .clock(clock.clone())
///     .build();
///
/// let _ = circuit.execute(|| Err::<(), _>("connection refused"));
/// assert!(circuit.is_open());
///
/// clock.advance(Duration::from_secs(30));
/// let _ = circuit.execute(|| Ok::<_, &str>(()));
/// assert!(circuit.is_half_open());
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    /// f64 seconds stored as raw bits
    now_bits: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading zero
    pub fn new() -> Self {
        Self::starting_at(0.0)
    }

    /// Create a clock reading `secs`
    pub fn starting_at(secs: f64) -> Self {
        Self {
            now_bits: AtomicU64::new(secs.to_bits()),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let delta = by.as_secs_f64();
        let mut current = self.now_bits.load(Ordering::Acquire);

        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.now_bits.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Jump to an absolute reading
    pub fn set(&self, secs: f64) {
        self.now_bits.store(secs.to_bits(), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn monotonic_time(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();

        let time1 = clock.monotonic_time();
        thread::sleep(Duration::from_millis(10));
        let time2 = clock.monotonic_time();

        assert!(time2 > time1);
    }

    #[test]
    fn test_manual_clock_starts_at_zero() {
        let clock = ManualClock::new();
        assert_eq!(clock.monotonic_time(), 0.0);
    }

    #[test]
    fn test_manual_clock_advance_and_set() {
        let clock = ManualClock::starting_at(10.0);

        clock.advance(Duration::from_millis(1500));
        assert!((clock.monotonic_time() - 11.5).abs() < 1e-9);

        clock.set(2.0);
        assert_eq!(clock.monotonic_time(), 2.0);
    }

    #[test]
    fn test_manual_clock_concurrent_advance() {
        let clock = Arc::new(ManualClock::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let clock = Arc::clone(&clock);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    clock.advance(Duration::from_millis(1));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert!((clock.monotonic_time() - 0.8).abs() < 1e-6);
    }
}
