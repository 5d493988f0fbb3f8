//! Retry with exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::OAuthError {
    fn is_retryable(&self) -> bool {
        crate::OAuthError::is_retryable(self)
    }
}

/// Run `f` up to `max_attempts` times, doubling the backoff after each transient failure.
///
/// Non-retryable errors are returned immediately. `max_attempts` of 0 is treated as 1.
pub async fn with_retry<F, Fut, T, E>(
    max_attempts: u32,
    initial_backoff: Duration,
    label: &str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut backoff = initial_backoff;
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= max_attempts => return Err(e),
            Err(e) => {
                tracing::warn!(
                    target_name = label,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}
