//! State - task status in the ledger.

use serde::{Deserialize, Serialize};

/// TaskStatus is the persisted status of one task.
///
/// State transitions:
/// - Pending -> Complete
///
/// The transition is monotonic. Nothing ever moves a task back to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet completed by any worker.
    Pending,

    /// At least one worker ran the work function to success and committed.
    Complete,
}

impl TaskStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    pub fn is_complete(self) -> bool {
        matches!(self, TaskStatus::Complete)
    }
}
