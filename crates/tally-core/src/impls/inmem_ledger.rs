//! InMemoryLedgerStore - process-local ledger for tests and dry runs.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Ledger, TallyError};
use crate::ports::LedgerStore;

/// Ledger held behind a shared mutex.
///
/// Clones share the same ledger, so several worker loops in one process can
/// point at "the same file". `fail_next_loads` / `fail_next_saves` inject
/// transient storage errors.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    ledger: Arc<Mutex<Option<Ledger>>>,
    load_failures: Arc<AtomicU32>,
    save_failures: Arc<AtomicU32>,
    saves: Arc<AtomicU32>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `ledger`.
    pub fn with_ledger(ledger: Ledger) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(Some(ledger))),
            ..Self::default()
        }
    }

    /// Make the next `n` loads fail with a transient storage error.
    pub fn fail_next_loads(&self, n: u32) {
        self.load_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` saves fail with a transient storage error.
    pub fn fail_next_saves(&self, n: u32) {
        self.save_failures.store(n, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Option<Ledger> {
        self.ledger.lock().await.clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn injected(op: &str) -> TallyError {
        TallyError::storage(
            "memory",
            io::Error::new(io::ErrorKind::Other, format!("injected {op} failure")),
        )
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn load(&self) -> Result<Option<Ledger>, TallyError> {
        if Self::take_failure(&self.load_failures) {
            return Err(Self::injected("load"));
        }
        Ok(self.ledger.lock().await.clone())
    }

    async fn save(&self, ledger: &Ledger) -> Result<(), TallyError> {
        if Self::take_failure(&self.save_failures) {
            return Err(Self::injected("save"));
        }
        *self.ledger.lock().await = Some(ledger.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;

    #[tokio::test]
    async fn clones_share_state() {
        let store = InMemoryLedgerStore::new();
        let other = store.clone();

        let ledger = Ledger::new(vec![TaskId::new("A")]).unwrap();
        store.save(&ledger).await.unwrap();

        assert_eq!(other.load().await.unwrap(), Some(ledger));
        assert_eq!(other.save_count(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryLedgerStore::new();
        store.fail_next_loads(2);

        assert!(store.load().await.unwrap_err().is_transient());
        assert!(store.load().await.is_err());
        assert!(store.load().await.unwrap().is_none());
    }
}
