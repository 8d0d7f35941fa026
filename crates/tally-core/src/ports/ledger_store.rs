//! LedgerStore port - where the authoritative ledger lives.
//!
//! The persisted copy is the source of truth. Callers never keep a `Ledger`
//! around across a lock release; they reload through this port instead.
//!
//! - `FileLedgerStore`: JSON file on a shared filesystem (production)
//! - `InMemoryLedgerStore`: process-local, with fault injection (tests)

use async_trait::async_trait;

use crate::domain::{Ledger, TallyError};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Human-readable location, used in logs and error messages.
    fn location(&self) -> String;

    /// Read the persisted ledger, or `None` if nothing was ever saved.
    async fn load(&self) -> Result<Option<Ledger>, TallyError>;

    /// Replace the persisted ledger. Readers must never observe a partial write.
    async fn save(&self, ledger: &Ledger) -> Result<(), TallyError>;
}
