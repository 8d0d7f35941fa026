//! WorkerGroup - N worker loops sharing one ledger and one lock.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

use super::task_ledger::TaskLedger;
use super::worker_loop::{LoopOptions, WorkerLoop, WorkerReport};
use crate::domain::TallyError;
use crate::ports::{LockManager, WorkFunction};

/// Worker group handle.
/// - `request_shutdown()` で新しいタスクの claim を止める（実行中のタスクは最後まで走る）
/// - `join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: Arc<watch::Sender<bool>>,
    joins: Vec<(String, JoinHandle<Result<WorkerReport, TallyError>>)>,
}

impl WorkerGroup {
    /// Spawn `n` loops named `worker-0` .. `worker-{n-1}`.
    pub fn spawn(
        n: usize,
        ledger: TaskLedger,
        lock: Arc<dyn LockManager>,
        work: Arc<dyn WorkFunction>,
        options: LoopOptions,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for i in 0..n {
            let label = format!("worker-{i}");
            let worker = WorkerLoop::new(
                label.clone(),
                ledger.clone(),
                Arc::clone(&lock),
                Arc::clone(&work),
            )
            .with_options(options.clone())
            .with_shutdown(shutdown_rx.clone());

            joins.push((label, tokio::spawn(worker.run())));
        }

        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            joins,
        }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Ask every loop to stop before its next claim.
    pub fn request_shutdown(&self) {
        self.shutdown_handle().request();
    }

    /// Detached trigger for `request_shutdown`, e.g. for a signal handler.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Wait for every loop; one result per worker, in spawn order.
    pub async fn join(self) -> Vec<Result<WorkerReport, TallyError>> {
        let mut results = Vec::with_capacity(self.joins.len());
        for (label, join) in self.joins {
            let result = match join.await {
                Ok(result) => result,
                Err(e) => {
                    error!(worker = %label, error = %e, "worker task aborted");
                    Err(TallyError::WorkerAborted {
                        worker: label,
                        reason: e.to_string(),
                    })
                }
            };
            results.push(result);
        }
        results
    }

    pub async fn shutdown_and_join(self) -> Vec<Result<WorkerReport, TallyError>> {
        self.request_shutdown();
        self.join().await
    }
}

#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        // receivers may already be gone
        let _ = self.tx.send(true);
    }
}
