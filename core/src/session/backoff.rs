//! Capped exponential backoff with jitter for reconnect attempts.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryPolicy;

/// Yields one delay per allowed retry: the initial delay, doubling up to
/// the cap, each with up to `jitter` extra milliseconds.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    jitter_ms: u64,
    remaining: u32,
}

impl Backoff {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            next: Duration::from_millis(policy.initial_backoff_ms),
            max: Duration::from_millis(policy.max_backoff_ms),
            jitter_ms: policy.jitter_ms,
            remaining: policy.max_retries,
        }
    }

    /// Retries still available.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let base = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);

        let jitter = if self.jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
        } else {
            Duration::ZERO
        };
        Some(base + jitter)
    }
}
