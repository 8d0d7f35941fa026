//! FileLedgerStore - JSON ledger on a shared filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{Ledger, TallyError};
use crate::fsutil;
use crate::ports::LedgerStore;

/// Ledger persisted as one pretty-printed JSON document.
///
/// Saves go through temp-file + rename, so a worker that crashes mid-save
/// leaves the previous ledger intact instead of a truncated one.
#[derive(Debug, Clone)]
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<Option<Ledger>, TallyError> {
        let Some(bytes) = fsutil::read_optional(&self.path).await? else {
            return Ok(None);
        };
        let ledger: Ledger =
            serde_json::from_slice(&bytes).map_err(|source| TallyError::LedgerDecode {
                location: self.location(),
                source,
            })?;
        ledger.validate()?;
        debug!(path = %self.path.display(), tasks = ledger.len(), "loaded ledger");
        Ok(Some(ledger))
    }

    async fn save(&self, ledger: &Ledger) -> Result<(), TallyError> {
        let bytes = serde_json::to_vec_pretty(ledger).map_err(|source| TallyError::Serialize {
            what: format!("ledger {}", self.location()),
            source,
        })?;
        fsutil::write_atomic(&self.path, &bytes).await?;
        debug!(path = %self.path.display(), tasks = ledger.len(), "saved ledger");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskStatus};
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = FileLedgerStore::new(dir.path().join("ledger.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_preserves_order_and_status() {
        let dir = TempDir::new().unwrap();
        let store = FileLedgerStore::new(dir.path().join("job").join("ledger.json"));

        let mut ledger =
            Ledger::new(["B", "A", "C"].into_iter().map(TaskId::from)).unwrap();
        ledger
            .mark_complete(&TaskId::new("A"), "w0", Utc::now())
            .unwrap();
        store.save(&ledger).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        let order: Vec<&str> = loaded.tasks().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);
        assert_eq!(
            loaded.status_of(&TaskId::new("A")),
            Some(TaskStatus::Complete)
        );
    }

    #[tokio::test]
    async fn garbage_file_is_a_transient_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        tokio::fs::write(&path, b"{\"version\":1,\"tas").await.unwrap();

        let err = FileLedgerStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, TallyError::LedgerDecode { .. }));
        assert!(err.is_transient());
    }
}
