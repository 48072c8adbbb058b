//! Configuration types for the OpenPact SDK.

use openpact_core::auth::DEFAULT_MAX_REFRESH_RETRIES;
use std::time::Duration;
use url::Url;

/// Configuration for the OpenPact client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the admin gateway.
    pub base_url: Url,
    /// Request timeout.
    pub timeout: Duration,
    /// Retry configuration for transient failures.
    pub retry_config: RetryConfig,
    /// Refresh-and-retry cycles allowed per call on `token_expired`.
    pub max_refresh_retries: u32,
}

impl ClientConfig {
    /// Create a new configuration with the given base URL.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(30),
            retry_config: RetryConfig::default(),
            max_refresh_retries: DEFAULT_MAX_REFRESH_RETRIES,
        }
    }
}

/// Configuration for retrying transient failures (5xx, 429, timeouts).
/// Authentication failures are never retried here.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries.
    pub max_retries: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
    /// HTTP status codes to retry on.
    pub retry_on_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            retry_on_status_codes: vec![429, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// Create a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate backoff duration for a given attempt.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_ms = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);
        let backoff = Duration::from_millis(backoff_ms as u64);
        std::cmp::min(backoff, self.max_backoff)
    }

    /// Check if a status code should trigger a retry.
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status_codes.contains(&status)
    }
}
