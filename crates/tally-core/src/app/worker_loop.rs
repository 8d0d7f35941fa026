//! WorkerLoop - claim / execute / commit until the ledger is drained.
//!
//! # フロー
//! 1. ClaimAttempt: lock → reload → pick the first Pending task not yet tried this pass → unlock
//! 2. Executing: run the work function (no lock held)
//! 3. Committing: lock → reload → mark Complete → save → unlock
//! 4. Idle → back to 1, until a reload shows nothing Pending (Drained)
//!
//! The lock is not held while a task executes, so two loops can run the same
//! task at the same time. Work functions are idempotent; the second commit is
//! a no-op. This gives at-least-once execution.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::task_ledger::{TaskLedger, under_lock};
use crate::domain::{TaskId, TallyError};
use crate::ports::{LockManager, WorkFunction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    ClaimAttempt,
    Executing(TaskId),
    Committing(TaskId),
    /// A reload found no Pending task.
    Drained,
    /// Shutdown was requested between tasks.
    Stopped,
    /// Only tasks this loop already failed remain, and the pass limit is spent.
    GaveUp,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Drained | WorkerState::Stopped | WorkerState::GaveUp
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOptions {
    /// How many times a loop walks the Pending set before giving up on tasks it keeps failing.
    pub max_passes: u32,

    /// Pause before starting another pass.
    pub pass_backoff: Duration,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_passes: 3,
            pass_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub error: String,
}

/// What one loop did before reaching a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker: String,
    pub final_state: WorkerState,
    /// Tasks whose work function returned Ok and were committed by this loop.
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskFailure>,
    pub passes: u32,
}

pub struct WorkerLoop {
    label: String,
    ledger: TaskLedger,
    lock: Arc<dyn LockManager>,
    work: Arc<dyn WorkFunction>,
    options: LoopOptions,
    shutdown: Option<watch::Receiver<bool>>,

    state: WorkerState,
    attempted: HashSet<TaskId>,
    pass: u32,
    completed: Vec<TaskId>,
    failed: Vec<TaskFailure>,
}

impl WorkerLoop {
    pub fn new(
        label: impl Into<String>,
        ledger: TaskLedger,
        lock: Arc<dyn LockManager>,
        work: Arc<dyn WorkFunction>,
    ) -> Self {
        Self {
            label: label.into(),
            ledger,
            lock,
            work,
            options: LoopOptions::default(),
            shutdown: None,
            state: WorkerState::Idle,
            attempted: HashSet::new(),
            pass: 1,
            completed: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: LoopOptions) -> Self {
        self.options = options;
        self
    }

    /// Stop claiming new tasks once `shutdown` turns true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// Drive the state machine to a terminal state.
    ///
    /// Infrastructure failures (lock timeout, exhausted storage retries, a
    /// task id missing from the ledger) end the loop with `Err`. Work function
    /// failures do not.
    pub async fn run(mut self) -> Result<WorkerReport, TallyError> {
        info!(worker = %self.label, ledger = %self.ledger.location(), "worker started");
        while !self.state.is_terminal() {
            self.step().await?;
        }
        let report = self.report();
        info!(
            worker = %report.worker,
            state = ?report.final_state,
            completed = report.completed.len(),
            failed = report.failed.len(),
            "worker finished"
        );
        Ok(report)
    }

    /// Perform one transition.
    pub async fn step(&mut self) -> Result<&WorkerState, TallyError> {
        let next = match std::mem::replace(&mut self.state, WorkerState::Idle) {
            WorkerState::Idle => WorkerState::ClaimAttempt,
            WorkerState::ClaimAttempt => self.claim().await?,
            WorkerState::Executing(task_id) => self.execute(task_id).await,
            WorkerState::Committing(task_id) => self.commit(task_id).await?,
            terminal => terminal,
        };
        self.state = next;
        Ok(&self.state)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn claim(&mut self) -> Result<WorkerState, TallyError> {
        if self.shutdown_requested() {
            info!(worker = %self.label, "shutdown requested, not claiming");
            return Ok(WorkerState::Stopped);
        }

        let ledger = &self.ledger;
        let attempted = &self.attempted;
        let (remaining, pick) = under_lock(&*self.lock, || async move {
            let pending = ledger.reload().await?.pending_tasks();
            let pick = pending.iter().find(|id| !attempted.contains(*id)).cloned();
            Ok((pending.len(), pick))
        })
        .await?;

        if remaining == 0 {
            return Ok(WorkerState::Drained);
        }

        match pick {
            Some(task_id) => {
                debug!(worker = %self.label, %task_id, remaining, "claimed task");
                self.attempted.insert(task_id.clone());
                Ok(WorkerState::Executing(task_id))
            }
            // everything still Pending already failed in this loop during this pass
            None if self.pass >= self.options.max_passes => {
                warn!(
                    worker = %self.label,
                    remaining,
                    passes = self.pass,
                    "giving up on tasks that keep failing"
                );
                Ok(WorkerState::GaveUp)
            }
            None => {
                self.pass += 1;
                self.attempted.clear();
                debug!(worker = %self.label, pass = self.pass, "starting another pass");
                tokio::time::sleep(self.options.pass_backoff).await;
                Ok(WorkerState::ClaimAttempt)
            }
        }
    }

    async fn execute(&mut self, task_id: TaskId) -> WorkerState {
        info!(worker = %self.label, %task_id, "executing task");
        let started = Instant::now();
        match self.work.run(&task_id).await {
            Ok(()) => {
                debug!(
                    worker = %self.label,
                    %task_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "task finished"
                );
                WorkerState::Committing(task_id)
            }
            Err(e) => {
                // no partial credit: the task stays Pending for whoever comes next
                error!(worker = %self.label, %task_id, error = %e, "task failed");
                self.failed.push(TaskFailure {
                    task_id,
                    error: e.to_string(),
                });
                WorkerState::ClaimAttempt
            }
        }
    }

    async fn commit(&mut self, task_id: TaskId) -> Result<WorkerState, TallyError> {
        let ledger = &self.ledger;
        let label = self.label.as_str();
        let id = &task_id;
        under_lock(&*self.lock, || async move {
            ledger.mark_complete(id, label).await
        })
        .await?;

        info!(worker = %self.label, %task_id, "task complete");
        self.completed.push(task_id);
        Ok(WorkerState::Idle)
    }

    fn report(&self) -> WorkerReport {
        WorkerReport {
            worker: self.label.clone(),
            final_state: self.state.clone(),
            completed: self.completed.clone(),
            failed: self.failed.clone(),
            passes: self.pass,
        }
    }
}
