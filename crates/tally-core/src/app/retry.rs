//! Retry policy: bounded retries for transient storage failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::domain::TallyError;

/// Retry policy for transient storage failures.
///
/// Fixed 200ms interval by default, bounded attempts; after `max_attempts`
/// the failure surfaces as `RetriesExhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between attempts.
    pub interval: Duration,

    /// Total attempts, including the first one.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for RetryPolicy {
    /// 200ms fixed interval, 50 attempts (about ten seconds of trying).
    fn default() -> Self {
        Self::fixed(Duration::from_millis(200), 50)
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// Only `TallyError::is_transient` failures are retried.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, TallyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TallyError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => {
                return Err(TallyError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                let delay = policy.interval;
                warn!(operation, attempt, error = %e, delay_ms = delay.as_millis() as u64, "transient failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> TallyError {
        TallyError::storage(
            "/shared/ledger.json",
            std::io::Error::new(std::io::ErrorKind::Other, "stale NFS handle"),
        )
    }

    #[test]
    fn default_policy_is_fixed_interval() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.interval, Duration::from_millis(200));
        assert_eq!(policy.max_attempts, 50);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::fixed(Duration::ZERO, 0).max_attempts, 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1), 5);
        let calls = AtomicU32::new(0);

        let value = retry(&policy, "load", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1), 3);
        let calls = AtomicU32::new(0);

        let err = retry(&policy, "save", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(transient())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TallyError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1), 10);
        let calls = AtomicU32::new(0);

        let err = retry(&policy, "mark", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TallyError::UnknownTask(TaskId::new("Z")))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TallyError::UnknownTask(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
