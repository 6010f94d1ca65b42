//! Retry with exponential backoff for remote transcription calls.
//!
//! Failures are classified as rate limits, transient errors, or fatal errors.
//! Rate limits honour a server-provided hint when there is one. Every retry is
//! reported to the caller before the wait starts, so a client can show why the
//! request is taking long. Once the attempts run out the last error is
//! returned unchanged.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// How a failure should be treated by [`call_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Quota or throughput exceeded.
    RateLimited,
    /// Timeout or transient server-side error.
    Transient,
    /// Anything else. Never retried.
    Fatal,
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureClass::Fatal)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureClass::RateLimited => "rate limited",
            FailureClass::Transient => "transient failure",
            FailureClass::Fatal => "fatal failure",
        };
        f.write_str(text)
    }
}

/// Errors that know how they should be retried.
pub trait Retryable {
    fn class(&self) -> FailureClass;

    /// Server-provided wait before the next attempt, if any.
    fn retry_hint(&self) -> Option<Duration> {
        None
    }
}

/// Retry limits and backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_retries: u32,
    pub base: Duration,
    pub rate_limit_ceiling: Duration,
    pub transient_ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base: Duration::from_secs(2),
            rate_limit_ceiling: Duration::from_secs(60),
            transient_ceiling: Duration::from_secs(30),
        }
    }
}

/// A retry that is about to happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNotice {
    /// The attempt that just failed, starting at 1.
    pub attempt: u32,
    pub max_retries: u32,
    pub wait: Duration,
    pub class: FailureClass,
    pub reason: String,
}

impl fmt::Display for RetryNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (attempt {}/{}), retrying in {:.1}s: {}",
            self.class,
            self.attempt,
            self.max_retries,
            self.wait.as_secs_f64(),
            self.reason
        )
    }
}

/// Wait before the attempt following `attempt` (1-based).
pub fn backoff_delay(
    policy: &RetryPolicy,
    class: FailureClass,
    attempt: u32,
    hint: Option<Duration>,
) -> Duration {
    let exponential = || {
        let exp = attempt.saturating_sub(1).min(31);
        policy.base.saturating_mul(1u32 << exp)
    };
    match class {
        FailureClass::RateLimited => hint
            .unwrap_or_else(exponential)
            .min(policy.rate_limit_ceiling),
        FailureClass::Transient => exponential().min(policy.transient_ceiling),
        FailureClass::Fatal => Duration::ZERO,
    }
}

/// Run `operation` until it succeeds, fails fatally, or runs out of attempts.
///
/// `on_retry` is called once per scheduled retry, before sleeping.
pub async fn call_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_retry: impl FnMut(&RetryNotice),
) -> Result<T, E>
where
    E: Retryable + fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_retries = policy.max_retries.max(1);
    let mut attempt = 1;

    loop {
        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Remote call succeeded after retries");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        let class = error.class();
        if !class.is_retryable() {
            debug!(attempt, error = %error, "Fatal remote failure, not retrying");
            return Err(error);
        }
        if attempt >= max_retries {
            warn!(attempt, error = %error, "Retry ceiling reached");
            return Err(error);
        }

        let wait = backoff_delay(policy, class, attempt, error.retry_hint());
        let notice = RetryNotice {
            attempt,
            max_retries,
            wait,
            class,
            reason: error.to_string(),
        };
        warn!(
            attempt,
            max_retries,
            wait_ms = wait.as_millis() as u64,
            class = %class,
            error = %error,
            "Retrying remote call"
        );
        on_retry(&notice);

        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
