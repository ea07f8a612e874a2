//! Retry with exponential backoff
//!
//! One helper shared by every loop that must keep trying a remote operation:
//! the archival merge and truncate steps (unbounded) and endpoint discovery
//! (bounded).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{error, info};

/// Backoff parameters for [`retry_with_backoff`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Multiplier applied after every failed attempt
    pub growth_factor: u32,
    /// Total attempts before giving up (None = retry forever)
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::archival()
    }
}

impl RetryPolicy {
    /// 5s initial delay, doubling up to 180s, never giving up
    pub fn archival() -> Self {
        Self {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(180),
            growth_factor: 2,
            max_attempts: None,
        }
    }

    /// Create a policy with the given backoff bounds
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            ..Self::archival()
        }
    }

    /// Set the growth factor
    pub fn with_growth_factor(mut self, factor: u32) -> Self {
        self.growth_factor = factor.max(1);
        self
    }

    /// Bound the number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Delay to wait after the `failures`-th consecutive failure (1-based)
    pub fn backoff(&self, failures: u32) -> Duration {
        let mut delay = self.initial_backoff.min(self.max_backoff);
        for _ in 1..failures {
            let next = delay.saturating_mul(self.growth_factor).min(self.max_backoff);
            if next == delay {
                break;
            }
            delay = next;
        }
        delay
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Run `op` until it succeeds, sleeping between failures per `policy`
///
/// Every failure is logged. When the policy bounds the number of attempts
/// the last error is returned once they are used up.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                error!(operation, attempt = attempts, error = %e, "Operation failed");
                if policy.exhausted(attempts) {
                    return Err(e);
                }
                let delay = policy.backoff(attempts);
                info!(
                    operation,
                    backoff_ms = delay.as_millis() as u64,
                    "Retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
