//! Checkpoint Store / Incremental Sync
//!
//! Tracks the watermark bounding already-processed mailbox history and asks
//! the mail source for the delta since it. A first run (no usable
//! checkpoint) bootstraps to the newest item and processes nothing.

mod checkpoint;

pub use checkpoint::{CheckpointStore, Watermark};

use crate::error::Result;
use crate::ingest::MailSource;
use std::sync::Arc;

/// New item ids since a watermark, plus the watermark to resume from next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub ids: Vec<String>,
    pub watermark: Watermark,
}

/// Where a run starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStart {
    /// No checkpoint existed; it was set to the newest item's marker.
    /// Nothing is processed on this run.
    Bootstrapped(Watermark),
    /// Resume after the persisted watermark
    Resume(Watermark),
}

impl SyncStart {
    pub fn watermark(&self) -> Watermark {
        match self {
            SyncStart::Bootstrapped(w) | SyncStart::Resume(w) => *w,
        }
    }
}

/// Watermark management over a [`CheckpointStore`] and a [`MailSource`].
pub struct IncrementalSync {
    store: CheckpointStore,
    source: Arc<dyn MailSource>,
}

impl IncrementalSync {
    pub fn new(store: CheckpointStore, source: Arc<dyn MailSource>) -> Self {
        Self { store, source }
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Current watermark, bootstrapping when the checkpoint is absent.
    pub async fn load(&self) -> Result<SyncStart> {
        if let Some(watermark) = self.store.read().await? {
            return Ok(SyncStart::Resume(watermark));
        }

        let marker = self.source.latest_marker().await?;
        self.store.commit(marker).await?;
        tracing::info!(watermark = %marker, "Checkpoint bootstrapped from latest message");
        Ok(SyncStart::Bootstrapped(marker))
    }

    /// Ids added since `watermark`, in source order.
    ///
    /// The returned watermark is never below `watermark`; a source that
    /// reports a lower one is clamped.
    pub async fn fetch_delta(&self, watermark: Watermark) -> Result<Delta> {
        let mut delta = self.source.list_since(watermark).await?;
        if delta.watermark < watermark {
            tracing::warn!(
                requested = %watermark,
                returned = %delta.watermark,
                "Mail source returned a regressed watermark, keeping the current one"
            );
            delta.watermark = watermark;
        }
        tracing::info!(
            from = %watermark,
            to = %delta.watermark,
            new_items = delta.ids.len(),
            "Fetched history delta"
        );
        Ok(delta)
    }

    /// Persist `watermark`, overwriting the previous value.
    pub async fn commit(&self, watermark: Watermark) -> Result<()> {
        self.store.commit(watermark).await
    }
}
