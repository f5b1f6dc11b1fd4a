//! Backoff for rate-limited or failing Bot API sends

use std::time::Duration;

use reqwest::StatusCode;

/// How often and how long a failed send is retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubles after each attempt
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based)
    ///
    /// A server-supplied `retry_after` wins over the backoff; both are capped.
    #[must_use]
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after
            .unwrap_or_else(|| {
                self.base_delay
                    .saturating_mul(2u32.saturating_pow(attempt))
            })
            .min(self.max_delay)
    }
}

/// Whether a response status is worth retrying
#[must_use]
pub fn is_recoverable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// `parameters.retry_after` from a Bot API error body, in seconds
#[must_use]
pub fn parse_retry_after(body: &str) -> Option<Duration> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let secs = v.get("parameters")?.get("retry_after")?.as_u64()?;
    Some(Duration::from_secs(secs))
}
