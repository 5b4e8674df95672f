//! Configuration for the audit log.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How appends retry after losing a compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total commit attempts per append, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single backoff, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 5,
            max_delay_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first conflict.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff after failed attempt number `attempt` (1-based).
    ///
    /// Exponential in the attempt number, capped at `max_delay_ms`, with
    /// the upper half randomized so that racing writers spread out.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ceiling = self
            .base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let floor = ceiling / 2;
        Duration::from_millis(rand::thread_rng().gen_range(floor..=ceiling))
    }
}

/// Configuration for an [`AuditLog`](crate::AuditLog).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditLogConfig {
    /// Retry behaviour for appends.
    pub retry: RetryPolicy,
    /// Entries read per page during verification.
    pub verify_page_size: usize,
    /// Entries read per page by queries and exports.
    pub query_page_size: usize,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            verify_page_size: 500,
            query_page_size: 100,
        }
    }
}
