//! Stage workers
//!
//! Each worker loops until its input is exhausted or closed, absorbing
//! per-record failures and returning only fatal ones. Dropping a worker's
//! sender is what closes the downstream queue.

use super::RunCounters;
use crate::enrich::Enricher;
use crate::error::{Error, Result};
use crate::ingest::MailSource;
use crate::record::Record;
use crate::router::ResourceRouter;
use std::fmt;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Receiver shared by the workers of one stage
pub(super) type SharedReceiver = Arc<Mutex<mpsc::Receiver<Record>>>;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Enrich,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Ingest => write!(f, "ingest"),
            Stage::Enrich => write!(f, "enrich"),
            Stage::Publish => write!(f, "publish"),
        }
    }
}

/// Await `fut` unless the run is cancelled first.
pub(super) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled("run cancelled".to_string())),
        result = fut => result,
    }
}

/// Send into a bounded queue, suspending while it is full.
///
/// Returns false when the run was cancelled or the consumer is gone.
async fn forward(tx: &mpsc::Sender<Record>, record: Record, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(record) => sent.is_ok(),
    }
}

/// Next record from a shared queue, or `None` once it is closed and empty
/// or the run is cancelled.
async fn next(rx: &SharedReceiver, cancel: &CancellationToken) -> Option<Record> {
    let mut rx = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        guard = rx.lock() => guard,
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        record = rx.recv() => record,
    }
}

/// Absorb a per-record error, or hand a fatal one back.
fn absorb(stage: Stage, record_id: &str, error: Error) -> Result<()> {
    if error.is_fatal() {
        tracing::error!(%stage, record_id, error = %error, "Fatal stage error");
        return Err(error);
    }
    tracing::warn!(%stage, record_id, error = %error, "Skipping record");
    Ok(())
}

/// Fetch each id in order and forward the converted record.
pub(super) async fn ingest(
    ids: Vec<String>,
    source: Arc<dyn MailSource>,
    tx: mpsc::Sender<Record>,
    counters: Arc<RunCounters>,
    cancel: CancellationToken,
) -> Result<()> {
    for id in ids {
        let item = match cancellable(&cancel, source.get(&id)).await {
            Ok(item) => item,
            Err(Error::Cancelled(_)) => break,
            Err(e) => {
                counters.skipped_ingest.fetch_add(1, Ordering::Relaxed);
                absorb(Stage::Ingest, &id, e)?;
                continue;
            }
        };

        let record = item.into_record();
        tracing::debug!(record_id = %record.id, partition = %record.partition_key(), "Fetched record");
        counters.fetched.fetch_add(1, Ordering::Relaxed);

        if !forward(&tx, record, &cancel).await {
            break;
        }
    }
    Ok(())
}

/// Summarize records until the input queue closes.
pub(super) async fn enrich(
    rx: SharedReceiver,
    enricher: Arc<Enricher>,
    tx: mpsc::Sender<Record>,
    counters: Arc<RunCounters>,
    cancel: CancellationToken,
) -> Result<()> {
    while let Some(record) = next(&rx, &cancel).await {
        let id = record.id.clone();
        let enriched = match cancellable(&cancel, enricher.enrich(record)).await {
            Ok(enriched) => enriched,
            Err(Error::Cancelled(_)) => break,
            Err(e) => {
                counters.dropped_enrich.fetch_add(1, Ordering::Relaxed);
                absorb(Stage::Enrich, &id, e)?;
                continue;
            }
        };

        tracing::debug!(record_id = %id, "Enriched record");
        counters.enriched.fetch_add(1, Ordering::Relaxed);

        if !forward(&tx, enriched, &cancel).await {
            break;
        }
    }
    Ok(())
}

/// Route each record to its partition's container and write it.
pub(super) async fn publish(
    rx: SharedReceiver,
    router: Arc<ResourceRouter>,
    counters: Arc<RunCounters>,
    cancel: CancellationToken,
) -> Result<()> {
    while let Some(record) = next(&rx, &cancel).await {
        let key = record.partition_key();
        let written = async {
            let handle = router.resolve(&key).await?;
            router.write(&handle, &record).await
        };

        match cancellable(&cancel, written).await {
            Ok(entry_id) => {
                tracing::info!(record_id = %record.id, partition = %key, entry_id = %entry_id, "Published record");
                counters.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(Error::Cancelled(_)) => break,
            Err(e) => {
                counters.failed_publish.fetch_add(1, Ordering::Relaxed);
                absorb(Stage::Publish, &record.id, e)?;
            }
        }
    }
    Ok(())
}
