//! Persisted partition → destination mapping

use super::ResourceHandle;
use crate::error::Result;
use crate::record::PartitionKey;
use crate::state;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One registry entry as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: PartitionKey,
    pub id: ResourceHandle,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    databases: Vec<RegistryEntry>,
}

/// Ordered list of `{partition key, handle}` pairs backed by a JSON file.
///
/// Loaded lazily on first lookup. Holds at most one handle per key.
#[derive(Debug)]
pub struct ResourceRegistry {
    path: PathBuf,
    entries: Option<Vec<RegistryEntry>>,
}

impl ResourceRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load from disk if not yet loaded. A missing file is an empty registry;
    /// a corrupt one is an error.
    pub async fn ensure_loaded(&mut self) -> Result<&[RegistryEntry]> {
        if self.entries.is_none() {
            let file: RegistryFile = state::read_json(&self.path).await?.unwrap_or_default();
            let mut entries: Vec<RegistryEntry> = Vec::with_capacity(file.databases.len());
            for entry in file.databases {
                if entries.iter().any(|e| e.name == entry.name) {
                    tracing::warn!(
                        partition = %entry.name,
                        handle = %entry.id,
                        "Duplicate registry entry ignored"
                    );
                    continue;
                }
                entries.push(entry);
            }
            tracing::debug!(
                path = %self.path.display(),
                entries = entries.len(),
                "Resource registry loaded"
            );
            self.entries = Some(entries);
        }
        Ok(self.entries.as_deref().unwrap_or_default())
    }

    /// Cached handle for `key`. Only meaningful after [`ensure_loaded`](Self::ensure_loaded).
    pub fn get(&self, key: &PartitionKey) -> Option<&ResourceHandle> {
        self.entries
            .as_ref()?
            .iter()
            .find(|e| &e.name == key)
            .map(|e| &e.id)
    }

    /// Append `{key, handle}` and write the whole list back atomically.
    ///
    /// The in-memory list only changes once the file write succeeded.
    pub async fn append(&mut self, key: PartitionKey, handle: ResourceHandle) -> Result<()> {
        let mut entries = self.ensure_loaded().await?.to_vec();
        if entries.iter().any(|e| e.name == key) {
            return Ok(());
        }
        entries.push(RegistryEntry {
            name: key,
            id: handle,
        });

        let file = RegistryFile { databases: entries };
        state::write_json_atomic(&self.path, &file).await?;
        self.entries = Some(file.databases);
        Ok(())
    }

    /// Read the registry file without caching it.
    pub async fn read_entries(path: &Path) -> Result<Vec<RegistryEntry>> {
        let file: RegistryFile = state::read_json(path).await?.unwrap_or_default();
        Ok(file.databases)
    }
}
