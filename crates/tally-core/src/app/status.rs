//! Status - ledger progress counts.

use serde::{Deserialize, Serialize};

use crate::domain::{Ledger, TaskStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCounts {
    pub total: usize,
    pub pending: usize,
    pub complete: usize,
}

impl LedgerCounts {
    pub fn is_drained(&self) -> bool {
        self.pending == 0
    }
}

impl From<&Ledger> for LedgerCounts {
    fn from(ledger: &Ledger) -> Self {
        let mut counts = LedgerCounts {
            total: ledger.len(),
            ..Default::default()
        };
        for record in ledger.tasks() {
            match record.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Complete => counts.complete += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use chrono::Utc;

    #[test]
    fn counts_follow_ledger() {
        let mut ledger = Ledger::new(["A", "B", "C"].into_iter().map(TaskId::from)).unwrap();
        ledger
            .mark_complete(&TaskId::new("B"), "w0", Utc::now())
            .unwrap();

        let counts = LedgerCounts::from(&ledger);
        assert_eq!(
            counts,
            LedgerCounts {
                total: 3,
                pending: 2,
                complete: 1
            }
        );
        assert!(!counts.is_drained());
    }
}
