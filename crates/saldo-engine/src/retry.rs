//! # Write-Conflict Retry
//!
//! SQLite allows one writer at a time, and every engine operation guards
//! its updates with optimistic version checks. Both failure shapes
//! (`SQLITE_BUSY`, version conflict) are transient: the whole attempt is
//! re-run against fresh reads after a short fixed delay.
//!
//! Business rejections are never retried. An order that lacks stock now
//! will lack stock in 100ms too, and retrying it would only burn time.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Attempts per operation before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Fixed delay between attempts.
pub const DEFAULT_BACKOFF_MS: u64 = 100;

/// Bounded fixed-delay retry for transient write conflicts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given bounds.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            delay,
        }
    }

    /// Maximum number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `attempt_fn` until it succeeds, fails with a non-retryable
    /// error, or exhausts the attempt budget.
    ///
    /// Each call of `attempt_fn` must be a complete attempt: validation,
    /// reads, and writes all inside it, so a retry sees fresh state.
    ///
    /// ## Returns
    /// * `Ok(value)` - an attempt succeeded
    /// * `Err(ConcurrencyConflict)` - every attempt hit a concurrent write
    /// * any other error - surfaced from the first non-retryable failure
    pub async fn run<T, Fut, F>(&self, operation: &str, mut attempt_fn: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut delay = Constant::new(self.delay);
        let mut attempt = 1u32;

        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        error = %e,
                        "Giving up after repeated write conflicts"
                    );
                    return Err(EngineError::ConcurrencyConflict { attempts: attempt });
                }
                Err(e) => {
                    warn!(operation, attempt, error = %e, "Write conflict, retrying");
                    if let Some(wait) = delay.next_backoff() {
                        tokio::time::sleep(wait).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saldo_core::CoreError;
    use saldo_db::DbError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_conflicts() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result = policy
            .run("test_op", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(EngineError::Db(DbError::Busy("locked".into())))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_concurrency_conflict() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result: EngineResult<()> = policy
            .run("test_op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Db(DbError::version_conflict("Order", "o1")))
            })
            .await;

        assert!(matches!(
            result,
            Err(EngineError::ConcurrencyConflict { attempts: 5 })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_business_rejections_fail_fast() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result: EngineResult<()> = policy
            .run("test_op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Core(CoreError::InsufficientStock {
                    product_id: "p1".into(),
                    available: 0,
                    requested: 1,
                }))
            })
            .await;

        assert!(matches!(result, Err(EngineError::Core(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
