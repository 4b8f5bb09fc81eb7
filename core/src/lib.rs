//! resource-guard - circuit breaker for database, cache and remote calls
//!
//! This crate wraps calls to an unreliable dependency with:
//! - Consecutive-failure tracking that opens the circuit at a threshold
//! - Fast rejection while open, with a distinct error kind
//! - Lazy recovery probing once the open timeout has elapsed (no timers)
//! - A shared handle that admits a single probe at a time across threads
//! - Optional bounded retry layered on top
//!
//! # Example
//!
//! ```rust
//! use resource_guard::{CircuitBreaker, CircuitError};
//! use std::time::Duration;
//!
//! let mut circuit = CircuitBreaker::builder("prisma-database")
//!     .failure_threshold(3)
//!     .success_threshold(2)
//!     .open_timeout(Duration::from_secs(30))
//!     .on_open(|name| eprintln!("circuit {} opened", name))
//!     .build();
//!
//! let result = circuit.execute(|| {
//!     // Your query here
//!     Ok::<_, String>(vec!["alice", "bob"])
//! });
//! assert!(result.is_ok());
//!
//! match circuit.execute(|| Err::<(), _>("connection refused".to_string())) {
//!     Err(CircuitError::Open { .. }) => println!("skipping, dependency is down"),
//!     Err(CircuitError::Execution(e)) => println!("query failed: {}", e),
//!     _ => {}
//! }
//!
//! println!("{:?}", circuit.metrics());
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod clock;
pub mod errors;
pub mod retry;
pub mod shared;

pub use builder::CircuitBuilder;
pub use callbacks::Callbacks;
pub use circuit::{CircuitBreaker, Config, Metrics};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use errors::CircuitError;
pub use retry::RetryPolicy;
pub use shared::SharedCircuitBreaker;

use std::fmt;

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }

    /// Map the state machine's state name
    pub(crate) fn from_machine(name: &str) -> Self {
        match name {
            "Open" => CircuitState::Open,
            "HalfOpen" => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names_match_machine() {
        for state in [
            CircuitState::Closed,
            CircuitState::Open,
            CircuitState::HalfOpen,
        ] {
            assert_eq!(CircuitState::from_machine(state.as_str()), state);
            assert_eq!(state.to_string(), state.as_str());
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_and_metrics_serialize() {
        let config: Config = serde_json::from_str(r#"{"failure_threshold": 3}"#).unwrap();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.success_threshold, 2);

        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 2}"#).unwrap();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.base_delay_ms, 5000);

        let metrics = CircuitBreaker::new("db", config).metrics();
        let json = serde_json::to_value(metrics).unwrap();
        assert_eq!(json["state"], "Closed");
        assert_eq!(json["failure_count"], 0);
    }
}
