//! TaskLedger - reload/mutate/save over a `LedgerStore`.
//!
//! The persisted ledger is authoritative. Every method here goes back to the
//! store instead of trusting an earlier snapshot, and transient storage
//! failures are retried under the configured `RetryPolicy`.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::retry::{RetryPolicy, retry};
use super::status::LedgerCounts;
use crate::domain::{Ledger, TaskId, TallyError};
use crate::ports::{Clock, LedgerStore, LockManager, SystemClock};

#[derive(Clone)]
pub struct TaskLedger {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl TaskLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn location(&self) -> String {
        self.store.location()
    }

    /// Load the existing ledger, or create one with every id Pending.
    ///
    /// An existing ledger wins: `task_ids` is ignored when one is found,
    /// because it already records what was enumerated and what is done.
    /// Run this under the lock when several workers may bootstrap at once.
    pub async fn initialize_or_load(&self, task_ids: &[TaskId]) -> Result<Ledger, TallyError> {
        retry(&self.retry, "initialize ledger", || async {
            if let Some(existing) = self.store.load().await? {
                if existing.len() != task_ids.len() {
                    debug!(
                        location = %self.location(),
                        persisted = existing.len(),
                        offered = task_ids.len(),
                        "existing ledger differs from offered task set; keeping the ledger"
                    );
                }
                return Ok(existing);
            }
            let ledger = Ledger::new(task_ids.iter().cloned())?;
            self.store.save(&ledger).await?;
            info!(location = %self.location(), tasks = ledger.len(), "created ledger");
            Ok(ledger)
        })
        .await
    }

    /// Fresh copy of the persisted ledger.
    pub async fn reload(&self) -> Result<Ledger, TallyError> {
        retry(&self.retry, "reload ledger", || self.load_existing()).await
    }

    /// Reload, flip `task_id` to Complete, save.
    ///
    /// # Contract
    /// The caller holds the ledger lock for the whole call. Without it a
    /// concurrent writer's completion can be overwritten by this save.
    pub async fn mark_complete(&self, task_id: &TaskId, worker: &str) -> Result<Ledger, TallyError> {
        retry(&self.retry, "mark task complete", || async {
            let mut ledger = self.load_existing().await?;
            if ledger.mark_complete(task_id, worker, self.clock.now())? {
                self.store.save(&ledger).await?;
                debug!(%task_id, worker, "task committed");
            } else {
                debug!(%task_id, worker, "task was already complete");
            }
            Ok(ledger)
        })
        .await
    }

    pub async fn counts(&self) -> Result<LedgerCounts, TallyError> {
        Ok(LedgerCounts::from(&self.reload().await?))
    }

    async fn load_existing(&self) -> Result<Ledger, TallyError> {
        self.store
            .load()
            .await?
            .ok_or_else(|| TallyError::LedgerMissing(self.location()))
    }
}

/// Run `f` between `acquire` and `release`.
///
/// The lock is released whether `f` succeeds or not. `LockLost` on release
/// means someone else held the lock while `f` ran, so it replaces a
/// successful result. Other release failures are only logged.
pub async fn under_lock<T, F, Fut>(lock: &dyn LockManager, f: F) -> Result<T, TallyError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, TallyError>>,
{
    let token = lock.acquire().await?;
    let result = f().await;
    match lock.release(token).await {
        Ok(()) => result,
        Err(lost @ TallyError::LockLost { .. }) => {
            error!(lock = %lock.name(), error = %lost, "lock was taken over while held");
            result.and(Err(lost))
        }
        Err(e) => {
            warn!(lock = %lock.name(), error = %e, "lock release failed");
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use crate::impls::{InMemoryLedgerStore, InMemoryLock};
    use std::time::Duration;

    fn ids(names: &[&str]) -> Vec<TaskId> {
        names.iter().map(|n| TaskId::new(*n)).collect()
    }

    fn ledger_over(store: &InMemoryLedgerStore) -> TaskLedger {
        TaskLedger::new(Arc::new(store.clone()))
            .with_retry(RetryPolicy::fixed(Duration::from_millis(1), 5))
    }

    #[tokio::test]
    async fn initialize_creates_then_loads_verbatim() {
        let store = InMemoryLedgerStore::new();
        let ledger = ledger_over(&store);

        let created = ledger.initialize_or_load(&ids(&["A", "B"])).await.unwrap();
        assert_eq!(created.pending_tasks(), ids(&["A", "B"]));
        assert_eq!(store.save_count(), 1);

        ledger.mark_complete(&TaskId::new("A"), "w0").await.unwrap();

        // a different offered set is ignored once a ledger exists
        let loaded = ledger
            .initialize_or_load(&ids(&["A", "B", "C", "D"]))
            .await
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.pending_tasks(), ids(&["B"]));
        assert_eq!(store.save_count(), 2);
    }

    #[tokio::test]
    async fn initialize_retries_transient_failures() {
        let store = InMemoryLedgerStore::new();
        store.fail_next_loads(2);
        store.fail_next_saves(1);

        let created = ledger_over(&store)
            .initialize_or_load(&ids(&["A"]))
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert!(store.snapshot().await.is_some());
    }

    #[tokio::test]
    async fn initialize_rejects_duplicate_ids() {
        let store = InMemoryLedgerStore::new();
        let err = ledger_over(&store)
            .initialize_or_load(&ids(&["A", "A"]))
            .await
            .unwrap_err();
        assert!(matches!(err, TallyError::DuplicateTask(_)));
        assert!(store.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn mark_complete_reloads_before_saving() {
        let store = InMemoryLedgerStore::new();
        let worker_a = ledger_over(&store);
        let worker_b = ledger_over(&store);
        worker_a.initialize_or_load(&ids(&["A", "B"])).await.unwrap();

        // B holds a stale snapshot from before A's commit
        let stale = worker_b.reload().await.unwrap();
        worker_a.mark_complete(&TaskId::new("A"), "a").await.unwrap();
        assert_eq!(stale.status_of(&TaskId::new("A")), Some(TaskStatus::Pending));

        let after = worker_b.mark_complete(&TaskId::new("B"), "b").await.unwrap();
        assert!(after.is_drained());
    }

    #[tokio::test]
    async fn mark_complete_gives_up_after_bounded_failures() {
        let store = InMemoryLedgerStore::new();
        let ledger = ledger_over(&store);
        ledger.initialize_or_load(&ids(&["A"])).await.unwrap();

        store.fail_next_saves(100);
        let err = ledger
            .mark_complete(&TaskId::new("A"), "w0")
            .await
            .unwrap_err();
        assert!(matches!(err, TallyError::RetriesExhausted { attempts: 5, .. }));
    }

    #[tokio::test]
    async fn reload_without_ledger_is_missing() {
        let store = InMemoryLedgerStore::new();
        let err = ledger_over(&store).reload().await.unwrap_err();
        assert!(matches!(err, TallyError::LedgerMissing(_)));
    }

    #[tokio::test]
    async fn under_lock_releases_on_error() {
        let lock = InMemoryLock::new();
        let result: Result<(), _> = under_lock(&lock, || async {
            Err(TallyError::UnknownTask(TaskId::new("Z")))
        })
        .await;

        assert!(result.is_err());
        assert!(!lock.is_held().await);
    }

    #[tokio::test]
    async fn takeover_during_critical_section_is_an_error() {
        use crate::impls::ExclusiveLock;
        use crate::ports::{FixedClock, PollPolicy};
        use chrono::{TimeZone, Utc};

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.lock");
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let lock = |clock: &Arc<FixedClock>| {
            ExclusiveLock::new(&path)
                .with_poll(PollPolicy::new(Duration::from_millis(2), 5))
                .with_lease(Duration::from_secs(10))
                .with_clock(clock.clone())
        };
        let slow = lock(&clock);
        let other = lock(&clock);

        let (clock, other) = (&clock, &other);
        let result = under_lock(&slow, || async move {
            // the lease runs out mid-section and another worker reclaims
            clock.advance(chrono::Duration::seconds(11));
            let _held = other.acquire().await?;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(TallyError::LockLost { .. })));
        assert!(path.exists(), "the new holder keeps its marker");
    }
}
