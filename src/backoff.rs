//! # Fibonacci Backoff
//!
//! Redelivery backoff for failed convergence passes. Grows more slowly than
//! exponential backoff, which suits API-server hiccups that usually clear
//! within a few retries.
//!
//! Sequence with the default 5s/300s bounds: 5s, 5s, 10s, 15s, 25s, 40s,
//! 65s, 105s, 170s, 275s, 300s (capped).

use std::time::Duration;

/// Fibonacci backoff calculator. Each delay is the sum of the previous two,
/// capped at a maximum.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Return the next delay and advance the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_seconds;

        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = next.min(self.max_seconds);

        Duration::from_secs(result)
    }

    /// Restart the sequence, used after a successful pass.
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(5, 300)
    }
}
