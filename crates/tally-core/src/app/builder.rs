//! JobBuilder - wiring a ledger store, a lock and policies into a `Job`.
//!
//! Missing pieces are reported by `build()` instead of surfacing later as a
//! worker failure halfway through a run.

use std::sync::Arc;

use tracing::info;

use super::retry::RetryPolicy;
use super::status::LedgerCounts;
use super::task_ledger::{TaskLedger, under_lock};
use super::worker_group::WorkerGroup;
use super::worker_loop::{LoopOptions, WorkerLoop, WorkerReport};
use crate::cache::ArtifactCache;
use crate::config::{LockMode, TallyConfig};
use crate::domain::{Ledger, TaskId, TallyError};
use crate::impls::{ExclusiveLock, FileLedgerStore, MarkerLock};
use crate::ports::{Clock, LedgerStore, LockManager, SystemClock, WorkFunction};

/// # Example
/// ```ignore
/// let job = JobBuilder::from_config(&TallyConfig::for_job_dir("run-42")).build()?;
/// job.initialize(&task_ids).await?;
/// let reports = job.run(4, Arc::new(work_fn(simulate))).await?;
/// ```
pub struct JobBuilder {
    store: Option<Arc<dyn LedgerStore>>,
    lock: Option<Arc<dyn LockManager>>,
    cache: Option<ArtifactCache>,
    retry: RetryPolicy,
    options: LoopOptions,
    clock: Arc<dyn Clock>,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            lock: None,
            cache: None,
            retry: RetryPolicy::default(),
            options: LoopOptions::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// File-backed store and lock at the configured paths.
    pub fn from_config(config: &TallyConfig) -> Self {
        let lock: Arc<dyn LockManager> = match config.lock_mode {
            LockMode::Exclusive => Arc::new(
                ExclusiveLock::new(&config.lock_path)
                    .with_poll(config.poll_policy())
                    .with_lease(config.lease()),
            ),
            LockMode::Marker => {
                Arc::new(MarkerLock::new(&config.lock_path).with_poll(config.poll_policy()))
            }
        };

        Self::new()
            .ledger_store(Arc::new(FileLedgerStore::new(&config.ledger_path)))
            .lock(lock)
            .cache(ArtifactCache::new(&config.cache_dir))
            .retry(config.retry_policy())
            .loop_options(config.loop_options())
    }

    pub fn ledger_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn lock(mut self, lock: Arc<dyn LockManager>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn cache(mut self, cache: ArtifactCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn loop_options(mut self, options: LoopOptions) -> Self {
        self.options = options;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Job, TallyError> {
        let store = self
            .store
            .ok_or_else(|| TallyError::Config("no ledger store configured".into()))?;
        let lock = self
            .lock
            .ok_or_else(|| TallyError::Config("no lock configured".into()))?;
        if self.options.max_passes == 0 {
            return Err(TallyError::Config("max_passes must be > 0".into()));
        }

        let ledger = TaskLedger::new(store)
            .with_retry(self.retry)
            .with_clock(self.clock);

        Ok(Job {
            ledger,
            lock,
            cache: self.cache,
            options: self.options,
        })
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured batch job: one ledger, one lock, any number of workers.
#[derive(Clone)]
pub struct Job {
    ledger: TaskLedger,
    lock: Arc<dyn LockManager>,
    cache: Option<ArtifactCache>,
    options: LoopOptions,
}

impl Job {
    pub fn ledger(&self) -> &TaskLedger {
        &self.ledger
    }

    pub fn lock(&self) -> &Arc<dyn LockManager> {
        &self.lock
    }

    pub fn cache(&self) -> Option<&ArtifactCache> {
        self.cache.as_ref()
    }

    pub fn options(&self) -> &LoopOptions {
        &self.options
    }

    /// Create the ledger if absent, under the lock, and return what is persisted.
    pub async fn initialize(&self, task_ids: &[TaskId]) -> Result<Ledger, TallyError> {
        let ledger = self.ledger.clone();
        let ids = task_ids.to_vec();
        under_lock(self.lock.as_ref(), move || async move {
            ledger.initialize_or_load(&ids).await
        })
        .await
    }

    pub async fn status(&self) -> Result<LedgerCounts, TallyError> {
        self.ledger.counts().await
    }

    pub fn worker(&self, label: impl Into<String>, work: Arc<dyn WorkFunction>) -> WorkerLoop {
        WorkerLoop::new(label, self.ledger.clone(), Arc::clone(&self.lock), work)
            .with_options(self.options.clone())
    }

    pub fn spawn_workers(&self, n: usize, work: Arc<dyn WorkFunction>) -> WorkerGroup {
        WorkerGroup::spawn(
            n,
            self.ledger.clone(),
            Arc::clone(&self.lock),
            work,
            self.options.clone(),
        )
    }

    /// Run `n` workers against an initialized ledger until each one stops.
    ///
    /// The first worker error is returned after every worker has finished.
    pub async fn run(
        &self,
        n: usize,
        work: Arc<dyn WorkFunction>,
    ) -> Result<Vec<WorkerReport>, TallyError> {
        info!(workers = n, ledger = %self.ledger.location(), "running job");
        let results = self.spawn_workers(n, work).join().await;
        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryLedgerStore, InMemoryLock};
    use crate::app::WorkerState;
    use crate::ports::work_fn;
    use std::time::Duration;
    use tempfile::TempDir;

    fn in_memory_job() -> (Job, InMemoryLedgerStore) {
        let store = InMemoryLedgerStore::new();
        let job = JobBuilder::new()
            .ledger_store(Arc::new(store.clone()))
            .lock(Arc::new(InMemoryLock::new()))
            .retry(RetryPolicy::fixed(Duration::from_millis(1), 3))
            .loop_options(LoopOptions {
                max_passes: 2,
                pass_backoff: Duration::from_millis(1),
            })
            .build()
            .unwrap();
        (job, store)
    }

    #[test]
    fn build_without_store_fails() {
        let result = JobBuilder::new().lock(Arc::new(InMemoryLock::new())).build();
        assert!(matches!(result, Err(TallyError::Config(msg)) if msg.contains("ledger store")));
    }

    #[test]
    fn build_without_lock_fails() {
        let result = JobBuilder::new()
            .ledger_store(Arc::new(InMemoryLedgerStore::new()))
            .build();
        assert!(matches!(result, Err(TallyError::Config(msg)) if msg.contains("lock")));
    }

    #[tokio::test]
    async fn initialize_keeps_existing_progress() {
        let (job, _store) = in_memory_job();
        let ids = vec![TaskId::new("A"), TaskId::new("B")];

        job.initialize(&ids).await.unwrap();
        job.ledger()
            .mark_complete(&TaskId::new("A"), "worker-0")
            .await
            .unwrap();

        let again = job.initialize(&ids).await.unwrap();
        assert!(again.status_of(&TaskId::new("A")).unwrap().is_complete());
        assert!(!job.lock().name().is_empty());
    }

    #[tokio::test]
    async fn run_drains_and_reports_per_worker() {
        let (job, _store) = in_memory_job();
        let ids: Vec<TaskId> = (0..6).map(|i| TaskId::new(format!("t{i}"))).collect();
        job.initialize(&ids).await.unwrap();

        let reports = job
            .run(3, Arc::new(work_fn(|_id: TaskId| async { Ok(()) })))
            .await
            .unwrap();

        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.final_state == WorkerState::Drained));
        let counts = job.status().await.unwrap();
        assert_eq!((counts.pending, counts.complete), (0, 6));
    }

    #[tokio::test]
    async fn from_config_uses_job_dir_files() {
        let dir = TempDir::new().unwrap();
        let config = TallyConfig::for_job_dir(dir.path());
        let job = JobBuilder::from_config(&config).build().unwrap();

        job.initialize(&[TaskId::new("A")]).await.unwrap();

        assert!(config.ledger_path.exists());
        assert!(!config.lock_path.exists(), "lock released after initialize");
        assert_eq!(job.cache().map(|c| c.root()), Some(config.cache_dir.as_path()));
    }
}
