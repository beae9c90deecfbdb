//! Retry and polling limits for deploys.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployPolicy {
    /// Total attempts per request, including the first. At least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub poll_interval: Duration,
    /// How long to poll before giving up with a timed-out outcome.
    pub timeout: Duration,
    /// Per-request limit, covering the upload.
    pub request_timeout: Duration,
}

impl Default for DeployPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl DeployPolicy {
    /// Delay after the `attempt`-th failure (1-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}
