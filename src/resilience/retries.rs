//! Retry policy for upstream server errors.
//!
//! # Responsibilities
//! - Decide whether a failed attempt gets another try
//! - Space retries with capped exponential backoff plus jitter
//!
//! # Design Decisions
//! - Only `HttpServer` (5xx under `raise_on_5xx`) is retried; connection
//!   errors and protocol violations surface immediately
//! - Retries happen before any body byte reaches the caller, never after
//! - A zero base delay retries immediately

use rand::Rng;
use std::time::Duration;

use crate::config::StreamingConfig;
use crate::error::ProxyError;

/// How many extra attempts a request gets, and how far apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            max_retries: config.num_5xx_retries,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
        }
    }

    /// Total attempts allowed, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether `attempt` (1-based) failing with `error` earns another try.
    pub fn should_retry(&self, attempt: u32, error: &ProxyError) -> bool {
        error.is_retryable() && attempt < self.max_attempts()
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 || self.base_delay_ms == 0 {
            return Duration::ZERO;
        }

        let factor = 2u64.saturating_pow(retry - 1);
        let delay_ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);

        // Up to 10% jitter so parallel retries do not line up.
        let jitter_range = delay_ms / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(delay_ms + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StreamingConfig::default())
    }
}
