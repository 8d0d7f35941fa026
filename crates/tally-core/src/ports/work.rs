//! WorkFunction port - the opaque, per-job unit of work.

use std::future::Future;

use async_trait::async_trait;

use crate::domain::{TaskId, TallyError};

/// Work executed for one task id.
///
/// # Preconditions
/// Implementations MUST be idempotent. The coordination layer gives
/// at-least-once execution: two workers may run the same task at the same
/// time, and a task whose worker crashed before committing runs again after
/// restart. Write outputs under a path derived from the task id, via a temp
/// file renamed into place, so a duplicate or partial run is never observable.
#[async_trait]
pub trait WorkFunction: Send + Sync {
    async fn run(&self, task_id: &TaskId) -> Result<(), TallyError>;
}

/// Adapter turning an async closure into a `WorkFunction`.
pub struct FnWork<F> {
    f: F,
}

/// Wrap `f` as a work function.
///
/// ```ignore
/// let work = work_fn(|id: TaskId| async move {
///     render_tile(&id).await
/// });
/// ```
pub fn work_fn<F, Fut>(f: F) -> FnWork<F>
where
    F: Fn(TaskId) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TallyError>> + Send,
{
    FnWork { f }
}

#[async_trait]
impl<F, Fut> WorkFunction for FnWork<F>
where
    F: Fn(TaskId) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TallyError>> + Send,
{
    async fn run(&self, task_id: &TaskId) -> Result<(), TallyError> {
        (self.f)(task_id.clone()).await
    }
}
