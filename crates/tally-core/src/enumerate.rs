//! Task enumeration helpers.

use std::path::Path;

use tokio::fs;
use tracing::warn;

use crate::domain::{TaskId, TallyError};

/// One task per sub-directory of `dir`, sorted by name.
///
/// Hidden entries (leading `.`), plain files and names that are not valid
/// UTF-8 are skipped.
pub async fn enumerate_dir(dir: impl AsRef<Path>) -> Result<Vec<TaskId>, TallyError> {
    let dir = dir.as_ref();
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| TallyError::storage(dir, e))?;

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| TallyError::storage(dir, e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| TallyError::storage(entry.path(), e))?;
        if !file_type.is_dir() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!(dir = %dir.display(), name = ?raw, "skipping directory with a non-UTF-8 name");
                continue;
            }
        };
        if name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names.into_iter().map(TaskId::from).collect())
}
