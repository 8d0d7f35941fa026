//! Ledger - the ordered task table and its pure operations.
//!
//! Persistence and locking live elsewhere (`ports::LedgerStore`, `ports::LockManager`).
//! Everything here works on an in-memory snapshot that is stale the moment it is read.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskStatus};
use crate::domain::errors::TallyError;

pub const LEDGER_FORMAT_VERSION: u32 = 1;

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub status: TaskStatus,

    /// When the task was first committed as Complete. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Label of the worker that committed completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
}

impl TaskRecord {
    pub fn pending(id: TaskId) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            completed_at: None,
            completed_by: None,
        }
    }
}

/// Ordered collection of task records.
///
/// Invariants:
/// - task ids are unique
/// - the task set never changes after creation; only Pending -> Complete flips
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    version: u32,
    tasks: Vec<TaskRecord>,
}

impl Ledger {
    /// Build a fresh ledger with every id Pending, keeping the given order.
    pub fn new(task_ids: impl IntoIterator<Item = TaskId>) -> Result<Self, TallyError> {
        let mut seen = HashSet::new();
        let mut tasks = Vec::new();
        for id in task_ids {
            if !seen.insert(id.clone()) {
                return Err(TallyError::DuplicateTask(id));
            }
            tasks.push(TaskRecord::pending(id));
        }
        Ok(Self {
            version: LEDGER_FORMAT_VERSION,
            tasks,
        })
    }

    /// Check invariants on a ledger that came from storage.
    pub fn validate(&self) -> Result<(), TallyError> {
        let mut seen = HashSet::new();
        for record in &self.tasks {
            if !seen.insert(&record.id) {
                return Err(TallyError::DuplicateTask(record.id.clone()));
            }
        }
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&TaskRecord> {
        self.tasks.iter().find(|r| &r.id == task_id)
    }

    pub fn status_of(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.get(task_id).map(|r| r.status)
    }

    /// Pending ids in enumeration order.
    pub fn pending_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|r| r.status.is_pending())
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn is_drained(&self) -> bool {
        self.tasks.iter().all(|r| r.status.is_complete())
    }

    /// Flip one task to Complete.
    ///
    /// Returns `false` if it was already Complete (the first completion stamp is kept).
    pub fn mark_complete(
        &mut self,
        task_id: &TaskId,
        worker: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, TallyError> {
        let record = self
            .tasks
            .iter_mut()
            .find(|r| &r.id == task_id)
            .ok_or_else(|| TallyError::UnknownTask(task_id.clone()))?;

        if record.status.is_complete() {
            return Ok(false);
        }
        record.status = TaskStatus::Complete;
        record.completed_at = Some(at);
        record.completed_by = Some(worker.to_string());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ids(names: &[&str]) -> Vec<TaskId> {
        names.iter().map(|n| TaskId::new(*n)).collect()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn new_ledger_is_all_pending_in_order() {
        let ledger = Ledger::new(ids(&["C", "A", "B"])).unwrap();
        assert_eq!(ledger.pending_tasks(), ids(&["C", "A", "B"]));
        assert!(!ledger.is_drained());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = Ledger::new(ids(&["A", "B", "A"])).unwrap_err();
        assert!(matches!(err, TallyError::DuplicateTask(id) if id.as_str() == "A"));
    }

    #[test]
    fn mark_complete_is_monotonic() {
        let mut ledger = Ledger::new(ids(&["A", "B"])).unwrap();
        assert!(ledger.mark_complete(&TaskId::new("A"), "w0", at()).unwrap());
        assert!(!ledger.mark_complete(&TaskId::new("A"), "w1", at()).unwrap());

        let record = ledger.get(&TaskId::new("A")).unwrap();
        assert_eq!(record.status, TaskStatus::Complete);
        assert_eq!(record.completed_by.as_deref(), Some("w0"));
        assert_eq!(ledger.pending_tasks(), ids(&["B"]));
    }

    #[test]
    fn mark_complete_unknown_task_fails() {
        let mut ledger = Ledger::new(ids(&["A"])).unwrap();
        let err = ledger
            .mark_complete(&TaskId::new("nope"), "w0", at())
            .unwrap_err();
        assert!(matches!(err, TallyError::UnknownTask(_)));
    }

    #[test]
    fn empty_ledger_is_drained() {
        let ledger = Ledger::new(Vec::new()).unwrap();
        assert!(ledger.is_drained());
        assert!(ledger.is_empty());
    }

    #[test]
    fn persisted_form_uses_snake_case_status() {
        let ledger = Ledger::new(ids(&["A"])).unwrap();
        let json = serde_json::to_value(&ledger).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "version": 1, "tasks": [ { "id": "A", "status": "pending" } ] })
        );
    }

    #[test]
    fn validate_catches_duplicates_from_storage() {
        let raw = r#"{"version":1,"tasks":[{"id":"A","status":"pending"},{"id":"A","status":"complete"}]}"#;
        let ledger: Ledger = serde_json::from_str(raw).unwrap();
        assert!(ledger.validate().is_err());
    }
}
