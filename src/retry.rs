//! Retry logic with exponential backoff
//!
//! Used by the HTTP backend to re-issue the initial request when the
//! connection could not be established. Once a transfer is running, failures
//! are terminal and reach the requester unretried.
//!
//! # Example
//!
//! ```no_run
//! use media_dl::retry::{IsRetryable, with_retry};
//! use media_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (connect timeouts, refused connections) should return `true`.
/// Permanent failures (bad status, invalid locator) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for reqwest::Error {
    fn is_retryable(&self) -> bool {
        self.is_timeout() || self.is_connect()
    }
}

/// Run `operation`, retrying transient failures on an exponential schedule
///
/// Makes at most `config.max_attempts + 1` calls. Non-retryable errors are
/// returned immediately; otherwise the last error is returned once the
/// schedule runs out.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut delays = backoff(config);
    let mut attempt: u32 = 1;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if !error.is_retryable() {
            return Err(error);
        }
        let Some(delay) = delays.next() else {
            tracing::warn!(error = %error, attempts = attempt, "request failed, giving up");
            return Err(error);
        };

        let delay = if config.jitter { add_jitter(delay) } else { delay };
        tracing::warn!(
            error = %error,
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            "request failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Delays before each retry: `initial_delay` grown by `backoff_multiplier`, capped at `max_delay`
fn backoff(config: &RetryConfig) -> impl Iterator<Item = Duration> + '_ {
    std::iter::successors(Some(config.initial_delay.min(config.max_delay)), move |delay| {
        let next = Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
            .unwrap_or(config.max_delay);
        Some(next.min(config.max_delay))
    })
    .take(config.max_attempts as usize)
}

/// Jitter is uniform between 0% and 100% of the delay.
fn add_jitter(delay: Duration) -> Duration {
    let jitter_factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
