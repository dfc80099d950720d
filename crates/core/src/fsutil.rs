use std::{
    io,
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{fs, io::AsyncWriteExt};
use tracing::warn;
use uuid::Uuid;

pub const TMP_SUFFIX: &str = ".tmp";

/// Result of a best-effort removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    Removed,
    NotPresent,
}

/// Temp sibling of `path` in the same directory, so the final rename never
/// crosses a filesystem.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}{TMP_SUFFIX}", Uuid::new_v4().simple()))
}

/// Write `bytes` to `path` via temp file + fsync + rename. Readers see either
/// the old content or the new content, never a prefix.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let tmp = temp_sibling(path);
    let written = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if written.is_err() {
        cleanup_logged(&tmp).await;
    }
    written
}

pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    write_atomic(path, &json).await
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    let bytes = fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub async fn remove_if_exists(path: &Path) -> io::Result<Cleanup> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(Cleanup::Removed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Cleanup::NotPresent),
        Err(e) => Err(e),
    }
}

/// Remove `path`, logging instead of failing. Used on cleanup paths where the
/// primary outcome has already been decided.
pub async fn cleanup_logged(path: &Path) -> Option<Cleanup> {
    match remove_if_exists(path).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cleanup failed");
            None
        }
    }
}

/// Delete leftover temp files from an interrupted run.
pub async fn sweep_temp_files(dir: &Path) -> io::Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut swept = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.')
            && name.ends_with(TMP_SUFFIX)
            && cleanup_logged(&entry.path()).await == Some(Cleanup::Removed)
        {
            swept += 1;
        }
    }
    Ok(swept)
}
