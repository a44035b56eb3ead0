//! Bounded retry for transient upstream failures.
//!
//! Some sources shed load with intermittent 5xx responses when queried hard.
//! [`RetryPolicy`] re-runs a fetch a fixed number of times with a short fixed
//! delay in between, warning once per run so a flapping upstream does not
//! flood the log.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};

use crate::repo::RepoError;

/// Total attempts per run, the first included.
pub const DEFAULT_ATTEMPTS: usize = 5;

/// Fixed delay between attempts, in milliseconds.
pub const DEFAULT_DELAY_MS: u64 = 100;

/// Retry configuration for repository fetches.
///
/// Only errors classified transient ([`RepoError::is_transient`]) are
/// retried; everything else propagates immediately. When the budget runs
/// out, the final error propagates unchanged.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: usize,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a custom budget.
    ///
    /// `attempts` counts every invocation including the first; zero is
    /// treated as one.
    #[must_use]
    pub fn new(attempts: usize, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Build the constant backoff strategy for this policy.
    #[must_use]
    pub fn to_backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.attempts - 1)
    }

    /// Run `operation`, retrying transient errors within the budget.
    ///
    /// Emits a single warning on the first retry of a run; later retries log
    /// at debug level.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, RepoError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepoError>>,
    {
        let total = self.attempts;
        let attempt = AtomicU32::new(0);
        let warned = AtomicBool::new(false);

        let retry_op = || {
            attempt.fetch_add(1, Ordering::SeqCst);
            operation()
        };

        retry_op
            .retry(self.to_backoff())
            .notify(|err, dur| {
                let used = attempt.load(Ordering::SeqCst) as usize;
                let remaining = total.saturating_sub(used);
                if warned.swap(true, Ordering::SeqCst) {
                    tracing::debug!("still failing ({err}); retrying in {dur:?}");
                } else {
                    tracing::warn!(
                        "{err}; retrying up to {remaining} more times after a short delay"
                    );
                }
            })
            .when(|err: &RepoError| err.is_transient())
            .await
    }
}
