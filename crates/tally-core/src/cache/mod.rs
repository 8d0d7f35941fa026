//! ArtifactCache - load-or-compute cache with self-healing on corruption.
//!
//! One JSON object per key under a root directory. A cached object that no
//! longer decodes (truncated write, disk trouble, stale schema) is deleted on
//! sight and reported as `Absent`, so the next `get_or_compute` rebuilds it.
//! Nothing outside this module ever sees the corrupt state.
//!
//! Corruption is recognized by `serde_json`'s error category, never by
//! matching error text. Anything that is not a decode failure (permission
//! errors, a directory where the file should be, ...) propagates.

mod key;

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::error::Category;
use tokio::fs;
use tracing::{debug, warn};

use crate::domain::TallyError;
use crate::fsutil;

/// Result of `ArtifactCache::try_load`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState<T> {
    Valid(T),
    Absent,
}

impl<T> CacheState<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, CacheState::Valid(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            CacheState::Valid(value) => Some(value),
            CacheState::Absent => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Child cache in its own sub-directory. Keys in different namespaces never interfere.
    pub fn namespace(&self, name: &str) -> ArtifactCache {
        ArtifactCache::new(self.root.join(key::slug(name)))
    }

    /// Where the object for `key` lives.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key::file_name_for(key))
    }

    pub async fn contains(&self, key: &str) -> Result<bool, TallyError> {
        let path = self.path_for(key);
        fs::try_exists(&path)
            .await
            .map_err(|e| TallyError::storage(path, e))
    }

    /// Load the object for `key`, evicting it if it is corrupt.
    pub async fn try_load<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<CacheState<T>, TallyError> {
        let path = self.path_for(key);
        let Some(bytes) = fsutil::read_optional(&path).await? else {
            return Ok(CacheState::Absent);
        };

        match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => {
                debug!(key, path = %path.display(), "cache hit");
                Ok(CacheState::Valid(value))
            }
            Err(e) if is_corruption(&e) => {
                let corrupt = TallyError::CorruptArtifact {
                    key: key.to_string(),
                    source: e,
                };
                warn!(key, path = %path.display(), error = %corrupt, "evicting corrupt artifact");
                fsutil::remove_if_exists(&path).await?;
                Ok(CacheState::Absent)
            }
            Err(e) => Err(TallyError::storage(path, e.into())),
        }
    }

    /// Persist `value` for `key`, replacing any previous object atomically.
    pub async fn store<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), TallyError> {
        let path = self.path_for(key);
        let bytes = serde_json::to_vec(value).map_err(|source| TallyError::Serialize {
            what: format!("artifact {key}"),
            source,
        })?;
        fsutil::write_atomic(&path, &bytes).await?;
        debug!(key, path = %path.display(), bytes = bytes.len(), "stored artifact");
        Ok(())
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// `compute` runs at most once per call. Its error is returned as
    /// `TallyError::Compute` and nothing is stored.
    pub async fn get_or_compute<T, F, Fut, E>(&self, key: &str, compute: F) -> Result<T, TallyError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if let CacheState::Valid(value) = self.try_load(key).await? {
            return Ok(value);
        }

        debug!(key, "cache miss, computing");
        let value = compute().await.map_err(|e| TallyError::Compute {
            key: key.to_string(),
            source: e.into(),
        })?;
        self.store(key, &value).await?;
        Ok(value)
    }

    /// Delete the object for `key`. Returns whether anything was removed.
    pub async fn remove(&self, key: &str) -> Result<bool, TallyError> {
        fsutil::remove_if_exists(&self.path_for(key)).await
    }
}

fn is_corruption(err: &serde_json::Error) -> bool {
    match err.classify() {
        Category::Syntax | Category::Eof | Category::Data => true,
        Category::Io => false,
    }
}
