//! Human-inspectable JSON state files
//!
//! Every local state file (credential, checkpoint, registry) goes through
//! [`write_json_atomic`]: the new content is written to a sibling temp file,
//! synced, then renamed over the target. A crash mid-write leaves either
//! the old file or the new one, never a truncated mix.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Serialize `value` and atomically replace the file at `path`.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| {
        Error::Persistence(format!("Failed to serialize {}: {}", path.display(), e))
    })?;
    write_atomic(path, &json).await
}

/// Atomically replace the file at `path` with `bytes`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence(path, "create parent of", e))?;
        }
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Persistence(format!("Invalid state path {}", path.display())))?;
    let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = async {
        let mut file = open_private(&tmp_path)
            .await
            .map_err(|e| persistence(&tmp_path, "create", e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| persistence(&tmp_path, "write", e))?;
        file.sync_all()
            .await
            .map_err(|e| persistence(&tmp_path, "sync", e))?;
        drop(file);
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| persistence(path, "replace", e))
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result
}

/// Read and parse a JSON file; `Ok(None)` when it does not exist.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(persistence(path, "read", e)),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| Error::Persistence(format!("Corrupt state file {}: {}", path.display(), e)))
}

/// Read a file's raw bytes; `Ok(None)` when it does not exist.
pub async fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(persistence(path, "read", e)),
    }
}

#[cfg(unix)]
async fn open_private(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await
}

#[cfg(not(unix))]
async fn open_private(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

fn persistence(path: &Path, op: &str, e: std::io::Error) -> Error {
    Error::Persistence(format!("Failed to {} {}: {}", op, path.display(), e))
}
