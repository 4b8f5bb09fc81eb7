//! Guarding a flaky database handle
//!
//! Run with `RUST_LOG=debug cargo run --example flaky_database` to see the
//! breaker's transition logs.

use resource_guard::{CircuitBreaker, CircuitError, RetryPolicy, SharedCircuitBreaker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Stand-in for a database client whose connection can drop
struct Database {
    reachable: AtomicBool,
}

impl Database {
    fn query(&self, sql: &str) -> Result<Vec<String>, String> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(vec![format!("row for `{}`", sql)])
        } else {
            Err("connection refused".to_string())
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let db = Database {
        reachable: AtomicBool::new(true),
    };

    let circuit: SharedCircuitBreaker = CircuitBreaker::builder("prisma-database")
        .failure_threshold(3)
        .success_threshold(2)
        .open_timeout(Duration::from_millis(500))
        .on_reject(|name| println!("  {} rejected a call", name))
        .build_shared();

    println!("--- Healthy database ---");
    match circuit.execute(|| db.query("SELECT * FROM users")) {
        Ok(rows) => println!("  {:?}", rows),
        Err(e) => println!("  {}", e),
    }

    println!("\n--- Database goes away, reconnect loop ---");
    db.reachable.store(false, Ordering::SeqCst);
    let reconnect = RetryPolicy::new(5, Duration::from_millis(50));
    match reconnect.run_shared(&circuit, || db.query("SELECT 1")) {
        Ok(_) => println!("  reconnected"),
        Err(e) if e.is_rejection() => println!("  gave up early: {}", e),
        Err(e) => println!("  still failing: {}", e),
    }
    println!("  metrics: {:?}", circuit.metrics());

    println!("\n--- Database recovers ---");
    db.reachable.store(true, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(600));
    for _ in 0..2 {
        match circuit.execute(|| db.query("SELECT * FROM projects")) {
            Ok(rows) => println!("  {:?} (state: {})", rows, circuit.state()),
            Err(CircuitError::Open { circuit, .. }) => println!("  {} still open", circuit),
            Err(e) => println!("  {}", e),
        }
    }
    println!("  metrics: {:?}", circuit.metrics());
}
