//! Retry logic with exponential backoff for transient API errors.
//!
//! Retrying lives here, in the client layer. Callers above it see either a
//! successful response or the last error. A backoff wait can be cut short
//! through an [`Interrupt`], which ends the call with [`Error::Interrupted`].

use crate::error::{Error, Result};
use crate::types::RetryConfig;
use std::thread;
use std::time::Duration;

/// Source of interruption for backoff waits.
pub trait Interrupt: Send + Sync {
    /// Wait up to `delay`. Returns `true` if the wait was interrupted.
    fn wait(&self, delay: Duration) -> bool;
}

/// Whether a call may be re-sent after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Re-sending has no additional effect (GET, PUT, DELETE)
    Idempotent,
    /// Re-sending may act twice (create, migrate); only refused requests are retried
    NonIdempotent,
}

impl Idempotency {
    fn allows_retry(self, error: &Error) -> bool {
        match self {
            Idempotency::Idempotent => error.is_retryable(),
            Idempotency::NonIdempotent => error.category().is_safe_to_resend(),
        }
    }
}

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called when an operation is being retried.
    ///
    /// # Arguments
    /// * `attempt` - Current attempt number (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay_ms` - Milliseconds until next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_ms: u64);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _error: &Error, _delay_ms: u64) {}
}

/// Callback that reports retries through the `log` facade.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_ms: u64) {
        log::warn!("Attempt {attempt}/{max_attempts} failed: {error}. Retrying in {delay_ms}ms...");
    }
}

/// Execute an operation with retry logic.
///
/// Retries the operation while it returns an error that `idempotency`
/// allows re-sending, using exponential backoff between attempts.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    idempotency: Idempotency,
    callback: Option<&dyn RetryCallback>,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    with_retry_until(config, idempotency, callback, None, operation)
}

/// Like [`with_retry`], but stops with [`Error::Interrupted`] as soon as
/// `interrupt` fires during a backoff wait.
pub fn with_retry_until<T, F>(
    config: &RetryConfig,
    idempotency: Idempotency,
    callback: Option<&dyn RetryCallback>,
    interrupt: Option<&dyn Interrupt>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match operation() {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !idempotency.allows_retry(&err) || attempt + 1 >= max_attempts {
            return Err(err);
        }

        let delay = config.delay_for_attempt(attempt);
        if let Some(cb) = callback {
            cb.on_retry(attempt + 1, max_attempts, &err, delay.as_millis() as u64);
        }
        match interrupt {
            Some(interrupt) => {
                if interrupt.wait(delay) {
                    log::debug!("Retry interrupted after attempt {}", attempt + 1);
                    return Err(Error::Interrupted);
                }
            }
            None => thread::sleep(delay),
        }
        attempt += 1;
    }
}
