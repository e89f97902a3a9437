//! Resource Router
//!
//! Maps a record's partition key (its calendar day) to a destination
//! container, creating the container on first use and remembering the
//! mapping in the registry file.
//!
//! Every resolve runs under the registry mutex, so concurrent publish
//! workers asking for the same unseen key trigger exactly one remote
//! create and all observe the same handle.

mod notion;
mod registry;

pub use notion::NotionClient;
pub use registry::{RegistryEntry, ResourceRegistry};

use crate::error::Result;
use crate::record::{PartitionKey, Record};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Remote identifier of a destination container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Column type in a container schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Title,
    Date,
    RichText,
}

/// A typed value written into one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Title(String),
    Date(String),
    RichText(String),
}

/// Ordered column definitions of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSchema {
    pub fields: Vec<(String, FieldKind)>,
}

impl ContainerSchema {
    /// Columns of a per-day record container
    pub fn records() -> Self {
        Self {
            fields: vec![
                ("Email From".to_string(), FieldKind::Title),
                ("Date".to_string(), FieldKind::Date),
                ("Subject".to_string(), FieldKind::RichText),
                ("Summary".to_string(), FieldKind::RichText),
            ],
        }
    }
}

/// Column values for one record. An empty timestamp omits the date column.
pub fn entry_fields(record: &Record) -> Vec<(String, FieldValue)> {
    let mut fields = vec![
        ("Email From".to_string(), FieldValue::Title(record.sender.clone())),
        ("Subject".to_string(), FieldValue::RichText(record.subject.clone())),
        (
            "Summary".to_string(),
            FieldValue::RichText(record.summary.clone().unwrap_or_default()),
        ),
    ];
    if !record.timestamp.is_empty() {
        fields.push(("Date".to_string(), FieldValue::Date(record.timestamp.clone())));
    }
    fields
}

/// Destination record store
#[async_trait]
pub trait Destination: Send + Sync {
    /// Create a container named `name` under `parent_id`.
    async fn create_container(
        &self,
        parent_id: &str,
        name: &str,
        schema: &ContainerSchema,
    ) -> Result<ResourceHandle>;

    /// Create one entry in a container, returning the entry id.
    ///
    /// Not idempotent: a retried write may duplicate the entry.
    async fn create_entry(
        &self,
        container: &ResourceHandle,
        fields: &[(String, FieldValue)],
    ) -> Result<String>;
}

/// Find-or-create router from partition keys to destination containers.
pub struct ResourceRouter {
    destination: Arc<dyn Destination>,
    parent_id: String,
    schema: ContainerSchema,
    registry: Mutex<ResourceRegistry>,
}

impl ResourceRouter {
    pub fn new(
        destination: Arc<dyn Destination>,
        parent_id: impl Into<String>,
        registry: ResourceRegistry,
    ) -> Self {
        Self {
            destination,
            parent_id: parent_id.into(),
            schema: ContainerSchema::records(),
            registry: Mutex::new(registry),
        }
    }

    /// Handle for `key`, creating and registering the container on a miss.
    ///
    /// A failed remote create is a per-record error; a failed registry
    /// load or write is a persistence error.
    pub async fn resolve(&self, key: &PartitionKey) -> Result<ResourceHandle> {
        let mut registry = self.registry.lock().await;
        registry.ensure_loaded().await?;

        if let Some(handle) = registry.get(key) {
            return Ok(handle.clone());
        }

        let handle = self
            .destination
            .create_container(&self.parent_id, key.as_str(), &self.schema)
            .await?;
        tracing::info!(partition = %key, handle = %handle, "Created destination container");

        registry.append(key.clone(), handle.clone()).await?;
        Ok(handle)
    }

    /// Write one record into the container behind `handle`.
    pub async fn write(&self, handle: &ResourceHandle, record: &Record) -> Result<String> {
        self.destination
            .create_entry(handle, &entry_fields(record))
            .await
    }
}
