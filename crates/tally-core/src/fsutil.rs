//! Filesystem helpers shared by the file-backed ledger and the artifact cache.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use ulid::Ulid;

use crate::domain::TallyError;

/// Write `bytes` to `path` so that readers see either the old or the new
/// content, never a prefix of it.
///
/// The temp file sits next to the target (same directory, same filesystem)
/// and carries a unique suffix, so concurrent writers of the same path never
/// share a temp file. The last rename wins.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TallyError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| TallyError::storage(parent, e))?;
    }

    let tmp = temp_path_for(path);
    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(TallyError::storage(&tmp, e));
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(TallyError::storage(path, e));
    }
    Ok(())
}

/// Remove `path`, treating "already gone" as success.
pub async fn remove_if_exists(path: &Path) -> Result<bool, TallyError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(TallyError::storage(path, e)),
    }
}

/// Read `path`, mapping not-found to `None`.
pub async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, TallyError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TallyError::storage(path, e)),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "object".to_string());
    path.with_file_name(format!(".{file_name}.{}.tmp", Ulid::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_atomic_creates_parents_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(fs::read(&path).await.unwrap(), b"second");

        // no temp files left behind
        let mut entries = fs::read_dir(path.parent().unwrap()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["out.json".to_string()]);
    }

    #[tokio::test]
    async fn remove_and_read_tolerate_missing_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing");
        assert!(!remove_if_exists(&path).await.unwrap());
        assert!(read_optional(&path).await.unwrap().is_none());
    }
}
