//! Error types for guarded calls

use std::error::Error;
use std::fmt;

/// Errors returned by a guarded call
///
/// `Execution` wraps the action's own error untouched. Every other variant is
/// produced by the breaker itself without running the action.
#[derive(Debug)]
pub enum CircuitError<E = Box<dyn Error + Send + Sync>> {
    /// Circuit is open, the call was rejected without being attempted
    Open {
        circuit: String,
        opened_at: f64,
        next_attempt_at: f64,
    },
    /// A recovery probe is already in flight
    HalfOpenLimitReached { circuit: String },
    /// The wrapped action failed
    Execution(E),
}

impl<E> CircuitError<E> {
    /// True when the breaker refused the call (the action never ran)
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CircuitError::Execution(_))
    }

    /// Name of the rejecting circuit, if this is a rejection
    pub fn circuit_name(&self) -> Option<&str> {
        match self {
            CircuitError::Open { circuit, .. } | CircuitError::HalfOpenLimitReached { circuit } => {
                Some(circuit.as_str())
            }
            CircuitError::Execution(_) => None,
        }
    }

    /// Upstream error, if the action ran and failed
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitError::Open {
                circuit,
                next_attempt_at,
                ..
            } => {
                write!(
                    f,
                    "Circuit '{}' is open, service temporarily unavailable (next attempt at {:.3})",
                    circuit, next_attempt_at
                )
            }
            CircuitError::HalfOpenLimitReached { circuit } => {
                write!(f, "Circuit '{}' is already probing for recovery", circuit)
            }
            CircuitError::Execution(e) => write!(f, "{}", e),
        }
    }
}

impl<E: Error + 'static> Error for CircuitError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct QueryError;

    impl fmt::Display for QueryError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "connection reset")
        }
    }

    impl Error for QueryError {}

    #[test]
    fn test_rejection_kinds() {
        let open: CircuitError<QueryError> = CircuitError::Open {
            circuit: "db".to_string(),
            opened_at: 1.0,
            next_attempt_at: 31.0,
        };
        let probing: CircuitError<QueryError> = CircuitError::HalfOpenLimitReached {
            circuit: "db".to_string(),
        };
        let upstream = CircuitError::Execution(QueryError);

        assert!(open.is_rejection());
        assert!(probing.is_rejection());
        assert!(!upstream.is_rejection());

        assert_eq!(open.circuit_name(), Some("db"));
        assert_eq!(upstream.circuit_name(), None);
    }

    #[test]
    fn test_execution_display_is_transparent() {
        let err = CircuitError::Execution(QueryError);
        assert_eq!(err.to_string(), "connection reset");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_open_display_names_circuit() {
        let err: CircuitError<QueryError> = CircuitError::Open {
            circuit: "prisma-database".to_string(),
            opened_at: 0.0,
            next_attempt_at: 30.0,
        };

        let message = err.to_string();
        assert!(message.contains("prisma-database"));
        assert!(message.contains("unavailable"));
        assert!(err.source().is_none());
    }

    #[test]
    fn test_into_inner() {
        let err: CircuitError<&str> = CircuitError::Execution("boom");
        assert_eq!(err.into_inner(), Some("boom"));

        let err: CircuitError<&str> = CircuitError::HalfOpenLimitReached {
            circuit: "cache".to_string(),
        };
        assert_eq!(err.into_inner(), None);
    }
}
