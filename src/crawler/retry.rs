use crate::config::RetryConfig;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// Retry schedule for a single URL
///
/// Delay before retry `n` (0-based) is `min(initial * 2^n, max)` plus a random
/// jitter of up to 10% of that delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    jitter_percent: u64,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            jitter_percent: 10,
        }
    }

    pub fn with_jitter(mut self, jitter_percent: u64) -> Self {
        self.jitter_percent = jitter_percent;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total attempts allowed, first attempt included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns true if another attempt is allowed after `attempts` attempts
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts()
    }

    /// Backoff before retry `retry` (0-based), without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponential = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(retry.min(20)));
        Duration::from_millis(exponential.min(self.max_backoff_ms))
    }

    /// Backoff before retry `retry` (0-based), jitter included
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry).as_millis() as u64;
        let jitter = if self.jitter_percent > 0 {
            rand::thread_rng().gen_range(0..=base * self.jitter_percent / 100)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    /// Delay honoring a server's Retry-After: the larger of the two wins
    pub fn delay_with_retry_after(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self.delay(retry);
        match retry_after {
            Some(server) => server.max(computed),
            None => computed,
        }
    }
}

/// Returns true for statuses worth retrying (429 and 5xx)
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Parses a Retry-After header value
///
/// Accepts delta-seconds or an HTTP date. A date in the past yields zero.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    parse_retry_after_at(value, Utc::now())
}

fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
