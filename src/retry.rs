//! Retry logic with backoff
//!
//! A small reusable policy ([`RetryConfig`]) drives every bounded-retry loop in
//! the pipeline: token requests, listing requests and image downloads.
//! Errors classify themselves through [`IsRetryable`]; rate-limited errors get
//! the policy's longer `rate_limit_delay` instead of the regular backoff.
//!
//! # Example
//!
//! ```no_run
//! use petfeed::retry::{IsRetryable, retry_with_backoff};
//! use petfeed::config::RetryConfig;
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
//! retry_with_backoff(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{AuthError, DownloadError, Error, FetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, 5xx, connection reset) should return `true`.
/// Permanent failures (rejected credentials, 404, disk errors) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Returns true if the server asked us to slow down (HTTP 429)
    fn is_rate_limited(&self) -> bool {
        false
    }

    /// Server-provided delay before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Statuses worth another attempt: request timeout, rate limiting and server errors
pub(crate) fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

impl IsRetryable for AuthError {
    fn is_retryable(&self) -> bool {
        match self {
            AuthError::Rejected { .. } => false,
            AuthError::Status { .. } => true,
            AuthError::Request(_) => true,
            AuthError::MalformedResponse(_) => false,
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, AuthError::Status { status: 429 })
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::RateLimited { .. } => true,
            FetchError::Unauthorized => false,
            // Any other non-2xx gets the short backoff
            FetchError::Status { .. } => true,
            FetchError::Request(_) => true,
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl IsRetryable for DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Status { status, .. } => is_transient_status(*status),
            DownloadError::Timeout { .. } => true,
            DownloadError::Request { .. } => true,
            // Local disk problems will not fix themselves between attempts
            DownloadError::Write { .. } => false,
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, DownloadError::Status { status: 429, .. })
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Auth(e) => e.is_retryable(),
            Error::Fetch(e) => e.is_retryable(),
            Error::Download(e) => e.is_retryable(),
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Config { .. }
            | Error::Credentials(_)
            | Error::DependencyMissing { .. }
            | Error::MissingFile(_)
            | Error::Schema(_)
            | Error::QueueFormat(_)
            | Error::Validation { .. }
            | Error::Convert(_)
            | Error::Filesystem { .. }
            | Error::Serialization(_)
            | Error::Interrupted => false,
        }
    }

    fn is_rate_limited(&self) -> bool {
        match self {
            Error::Auth(e) => e.is_rate_limited(),
            Error::Fetch(e) => e.is_rate_limited(),
            Error::Download(e) => e.is_rate_limited(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Fetch(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Execute an async operation with bounded retries
///
/// The operation runs at most `config.max_attempts` times. Between attempts the
/// task sleeps for the current backoff delay, which grows by
/// `backoff_multiplier` up to `max_delay`. Rate-limited errors sleep for
/// `rate_limit_delay` (or the server's `Retry-After`, if longer) instead.
///
/// Returns the successful result or the last error.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut backoff = config.initial_delay;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = retry_delay(config, backoff, &e);

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    rate_limited = e.is_rate_limited(),
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;

                if !e.is_rate_limited() {
                    let next =
                        Duration::from_secs_f64(backoff.as_secs_f64() * config.backoff_multiplier);
                    backoff = next.min(config.max_delay);
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Delay before the next attempt after `error`
pub(crate) fn retry_delay<E: IsRetryable>(
    config: &RetryConfig,
    backoff: Duration,
    error: &E,
) -> Duration {
    if error.is_rate_limited() {
        let requested = error
            .retry_after()
            .map(|d| d.min(config.max_delay))
            .unwrap_or_default();
        return config.rate_limit_delay.max(requested);
    }

    if config.jitter {
        add_jitter(backoff)
    } else {
        backoff
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
