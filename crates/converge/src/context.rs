//! Apply context and callback traits
//!
//! These let the executor report progress and honour cancellation without
//! depending on any particular UI.

use crate::types::Outcome;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Shared cancellation flag.
///
/// Clones share state. Waiting on the token returns early as soon as any
/// clone is cancelled, so long polling loops stop promptly.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every waiter.
    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `timeout`. Returns `true` if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback: Send {
    /// Called when starting a batch of jobs
    fn on_batch_start(&mut self, count: usize);

    /// Called when a job completes
    fn on_job_complete(&mut self, id: &str, outcome: &Outcome);

    /// Called when a batch completes
    fn on_batch_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_batch_start(&mut self, _count: usize) {}
    fn on_job_complete(&mut self, _id: &str, _outcome: &Outcome) {}
    fn on_batch_complete(&mut self) {}
}

/// Progress callback that writes to the log
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_batch_start(&mut self, count: usize) {
        log::info!("applying {count} job(s)");
    }

    fn on_job_complete(&mut self, id: &str, outcome: &Outcome) {
        if outcome.is_success() {
            log::info!("{id}: {outcome}");
        } else {
            log::warn!("{id}: {outcome}");
        }
    }

    fn on_batch_complete(&mut self) {}
}

/// Context passed to job runs
pub struct ApplyContext<'a> {
    pub cancel: &'a CancelToken,
}

impl<'a> ApplyContext<'a> {
    pub fn new(cancel: &'a CancelToken) -> Self {
        Self { cancel }
    }

    /// Fail fast when the batch has been cancelled.
    pub fn check_cancelled(&self) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            anyhow::bail!("cancelled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out_without_cancel() {
        let token = CancelToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(10)));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let other = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            other.cancel();
        });

        let start = Instant::now();
        assert!(token.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_check_cancelled() {
        let token = CancelToken::new();
        let ctx = ApplyContext::new(&token);
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert!(ctx.check_cancelled().is_err());
    }
}
