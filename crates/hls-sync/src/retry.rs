// Fixed-delay retry shared by segment downloads.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::SyncConfig;
use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// `retries` attempts in total, `retry_delay_ms` apart.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.attempts() - 1,
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

pub enum RetryAction<T> {
    Success(T),
    Retry(SyncError),
    Fail(SyncError),
}

impl<T> From<Result<T, SyncError>> for RetryAction<T> {
    fn from(result: Result<T, SyncError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) if err.is_retryable() => Self::Retry(err),
            Err(err) => Self::Fail(err),
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the retry budget
/// is spent. `operation` receives the 0-based attempt number.
///
/// The first attempt always runs. Once `token` is cancelled no further
/// attempts are made and the last error is returned.
pub async fn retry_with_delay<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, SyncError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0;
    loop {
        let err = match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => err,
        };
        if attempt >= policy.max_retries || token.is_cancelled() {
            return Err(err);
        }

        warn!(
            attempt = attempt + 1,
            max = policy.max_retries + 1,
            delay_ms = policy.delay.as_millis() as u64,
            error = %err,
            "Retrying after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(err),
            _ = tokio::time::sleep(policy.delay) => {}
        }
        attempt += 1;
    }
}
