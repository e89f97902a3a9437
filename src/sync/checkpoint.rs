//! Persisted watermark

use crate::error::Result;
use crate::state;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Totally ordered marker bounding already-seen mailbox history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(u64);

impl Watermark {
    /// A valid watermark; zero is not one.
    pub fn new(value: u64) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-disk checkpoint schema
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    #[serde(rename = "startHistoryId")]
    start_history_id: u64,
}

/// Single-value watermark store.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted watermark.
    ///
    /// A missing file, unparseable content, a missing field or a zero value
    /// all read as `None` (absent). Only an unreadable file is an error.
    pub async fn read(&self) -> Result<Option<Watermark>> {
        let Some(data) = state::read_bytes(&self.path).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<CheckpointFile>(&data) {
            Ok(file) => {
                let watermark = Watermark::new(file.start_history_id);
                if watermark.is_none() {
                    tracing::warn!(path = %self.path.display(), "Checkpoint holds zero watermark, treating as absent");
                }
                Ok(watermark)
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Invalid checkpoint, treating as absent: {}", e);
                Ok(None)
            }
        }
    }

    /// Persist `watermark`, atomically replacing the previous value.
    pub async fn commit(&self, watermark: Watermark) -> Result<()> {
        state::write_json_atomic(
            &self.path,
            &CheckpointFile {
                start_history_id: watermark.value(),
            },
        )
        .await?;
        tracing::debug!(watermark = %watermark, "Checkpoint committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CheckpointStore {
        CheckpointStore::new(dir.path().join("config.json"))
    }

    #[test]
    fn test_zero_is_not_a_watermark() {
        assert!(Watermark::new(0).is_none());
        assert_eq!(Watermark::new(5).unwrap().value(), 5);
        assert!(Watermark::new(5) < Watermark::new(6));
    }

    #[tokio::test]
    async fn test_commit_then_read() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.commit(Watermark::new(205).unwrap()).await.unwrap();
        assert_eq!(store.read().await.unwrap(), Watermark::new(205));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"startHistoryId\": 205"));
    }

    #[tokio::test]
    async fn test_missing_file_is_absent() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_and_invalid_are_absent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for content in [
            r#"{"startHistoryId": 0}"#,
            r#"{"somethingElse": 12}"#,
            r#"{"startHistoryId": "abc"}"#,
            r#"{"startHistoryId": -4}"#,
            "not json",
        ] {
            std::fs::write(store.path(), content).unwrap();
            assert!(store.read().await.unwrap().is_none(), "content: {}", content);
        }
    }
}
