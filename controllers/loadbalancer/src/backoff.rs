//! # Fibonacci Backoff
//!
//! Requeue delays for Services whose reconciliation keeps failing. Each
//! delay is the sum of the previous two, starting from the minimum and
//! capped at the maximum: 1m, 1m, 2m, 3m, 5m, 8m, 10m with the defaults.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(600);

/// Fibonacci backoff calculator
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    max: Duration,
    prev: Duration,
    current: Duration,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            prev: Duration::ZERO,
            current: min,
        }
    }

    /// Current delay; advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev + self.current;
        self.prev = self.current;
        self.current = next.min(self.max);
        result
    }

    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

/// Backoff sequence per resource key (`namespace/name`)
#[derive(Debug, Default)]
pub struct BackoffStates {
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl BackoffStates {
    /// Next requeue delay after a failure of `key`
    pub fn next_backoff(&self, key: &str) -> Duration {
        match self.states.lock() {
            Ok(mut states) => states.entry(key.to_string()).or_default().next_backoff(),
            Err(e) => {
                warn!("Failed to lock backoff states: {}, using default backoff", e);
                DEFAULT_MIN_BACKOFF
            }
        }
    }

    /// Forget the failures of `key` after a successful reconciliation
    pub fn reset(&self, key: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(key);
        }
    }
}
