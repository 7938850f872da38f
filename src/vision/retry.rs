use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::VisionError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Attempt `i` (zero-based) sleeps `base_delay * 2^i` before the
    /// next try: 1s, 2s, 4s with the default base.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Where an HTTP status lands in the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    RetryableRateLimit,
    RetryableServerError,
    /// 401: an auth failure will not self-resolve, never retried.
    AuthFailure,
    /// Any other non-200, terminal on first sight.
    Terminal(u16),
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200 => StatusClass::Success,
        401 => StatusClass::AuthFailure,
        429 => StatusClass::RetryableRateLimit,
        500..=599 => StatusClass::RetryableServerError,
        other => StatusClass::Terminal(other),
    }
}

/// How one attempt ended, as seen by the retry loop.
pub enum Attempt<T> {
    Done(T),
    /// Retryable; the carried error surfaces once the budget runs out.
    Retry(VisionError),
    Fail(VisionError),
}

/// Run `f` until it completes, fails terminally, or the attempt budget
/// is spent. Cancellation is checked before every attempt and before
/// every backoff sleep and never consumes anything.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut f: F,
) -> Result<T, VisionError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(VisionError::Cancelled);
        }
        match f(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(err) => return Err(err),
            Attempt::Retry(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    warn!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "retry budget exhausted"
                    );
                    return Err(err);
                }
                let backoff = policy.backoff(attempt - 1);
                warn!(
                    operation,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retrying after backoff"
                );
                if cancel.is_cancelled() {
                    return Err(VisionError::Cancelled);
                }
                sleep(backoff).await;
            }
        }
    }
}
