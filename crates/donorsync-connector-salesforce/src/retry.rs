//! Retry and request-logging settings for Salesforce API calls.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Statuses Salesforce uses for throttling and transient gateway trouble.
const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Exponential backoff for throttled or unavailable responses.
///
/// The delay doubles per attempt from `initial_backoff_ms` up to
/// `max_backoff_ms`, with up to 25% jitter either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 30_000,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0)
    }

    #[must_use]
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let doublings = (attempt - 1).min(30);
        let capped = self
            .initial_backoff_ms
            .saturating_mul(1u64 << doublings)
            .min(self.max_backoff_ms) as f64;

        let delay_ms = if self.use_jitter {
            capped * (0.75 + jitter_fraction() * 0.5)
        } else {
            capped
        };
        Duration::from_millis(delay_ms as u64)
    }

    #[must_use]
    pub fn should_retry(&self, status_code: u16) -> bool {
        RETRYABLE_STATUSES.contains(&status_code)
    }
}

/// Value in `[0, 1)` derived from the clock's sub-second nanos.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (f64::from(nanos) / f64::from(u32::MAX)).fract()
}

/// How much of each Salesforce request to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogVerbosity {
    Quiet,
    /// URL, status and attempt only.
    #[default]
    Normal,
    /// Also log request and response bodies. Never enable in production:
    /// donor PII ends up in the logs.
    Debug,
}

impl LogVerbosity {
    #[must_use]
    pub fn log_bodies(&self) -> bool {
        matches!(self, LogVerbosity::Debug)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, LogVerbosity::Quiet)
    }
}

/// Parse a `Retry-After` header given in delay-seconds.
///
/// HTTP-date values are not supported and yield `None`, which makes the
/// caller fall back to computed backoff.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
