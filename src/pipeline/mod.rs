//! Pipeline Orchestrator
//!
//! One run = one delta batch:
//!
//! ```text
//! load watermark ─► fetch delta ─► [ingest] ─q─► [enrich × N] ─q─► [publish × M] ─► commit
//! ```
//!
//! Queues are bounded, so a stalled consumer suspends its producer. Stages
//! are joined on a completion barrier; the first fatal error cancels the
//! run token and aborts the remaining stages.

mod stages;

pub use stages::Stage;

use crate::config::{CommitPolicy, PipelineConfig};
use crate::enrich::Enricher;
use crate::error::{Error, Result};
use crate::ingest::MailSource;
use crate::router::ResourceRouter;
use crate::sync::{IncrementalSync, SyncStart, Watermark};
use serde::{Deserialize, Serialize};
use stages::cancellable;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Ingesting,
    Draining,
    Completed,
    Cancelled,
    FailedFatal,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::FailedFatal
        )
    }
}

/// Per-run counters shared by the stage workers
#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    fetched: AtomicUsize,
    enriched: AtomicUsize,
    published: AtomicUsize,
    skipped_ingest: AtomicUsize,
    dropped_enrich: AtomicUsize,
    failed_publish: AtomicUsize,
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub state: RunState,
    /// Records fetched and forwarded by ingest
    pub fetched: usize,
    pub enriched: usize,
    pub published: usize,
    pub skipped_ingest: usize,
    pub dropped_enrich: usize,
    pub failed_publish: usize,
    /// Watermark persisted when the run ended
    pub watermark: Option<Watermark>,
    /// Error that ended the run, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: RunState::Idle,
            fetched: 0,
            enriched: 0,
            published: 0,
            skipped_ingest: 0,
            dropped_enrich: 0,
            failed_publish: 0,
            watermark: None,
            error: None,
        }
    }

    fn absorb_counters(&mut self, counters: &RunCounters) {
        self.fetched = counters.fetched.load(Ordering::Relaxed);
        self.enriched = counters.enriched.load(Ordering::Relaxed);
        self.published = counters.published.load(Ordering::Relaxed);
        self.skipped_ingest = counters.skipped_ingest.load(Ordering::Relaxed);
        self.dropped_enrich = counters.dropped_enrich.load(Ordering::Relaxed);
        self.failed_publish = counters.failed_publish.load(Ordering::Relaxed);
    }

    fn transition(&mut self, state: RunState) {
        tracing::info!(run_id = %self.run_id, from = ?self.state, to = ?state, "Run state changed");
        self.state = state;
    }

    fn fail(&mut self, error: &Error) {
        if let Error::Cancelled(_) = error {
            self.transition(RunState::Cancelled);
        } else {
            tracing::error!(run_id = %self.run_id, error = %error, "Run failed");
            self.error = Some(error.to_string());
            self.transition(RunState::FailedFatal);
        }
    }
}

/// Per-invocation fetch → enrich → publish pipeline
pub struct Pipeline {
    config: PipelineConfig,
    sync: IncrementalSync,
    source: Arc<dyn MailSource>,
    enricher: Arc<Enricher>,
    router: Arc<ResourceRouter>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        sync: IncrementalSync,
        source: Arc<dyn MailSource>,
        enricher: Arc<Enricher>,
        router: Arc<ResourceRouter>,
    ) -> Self {
        Self {
            config,
            sync,
            source,
            enricher,
            router,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels the run when triggered.
    ///
    /// Cancellation stops new sends, unblocks stages waiting on queues, and
    /// abandons in-flight records.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process one delta batch and report how it ended.
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::new(Uuid::new_v4());
        tracing::info!(run_id = %report.run_id, "Starting run");

        let start = match cancellable(&self.cancel, self.sync.load()).await {
            Ok(start) => start,
            Err(e) => {
                report.fail(&e);
                return report;
            }
        };

        let watermark = match start {
            SyncStart::Bootstrapped(watermark) => {
                report.watermark = Some(watermark);
                report.transition(RunState::Completed);
                return report;
            }
            SyncStart::Resume(watermark) => watermark,
        };
        report.watermark = Some(watermark);

        let delta = match cancellable(&self.cancel, self.sync.fetch_delta(watermark)).await {
            Ok(delta) => delta,
            Err(e) => {
                report.fail(&e);
                return report;
            }
        };

        if self.config.commit_policy == CommitPolicy::BeforePipeline {
            if let Err(e) = self.sync.commit(delta.watermark).await {
                report.fail(&e);
                return report;
            }
            report.watermark = Some(delta.watermark);
        }

        let counters = Arc::new(RunCounters::default());
        let outcome = self.run_stages(delta.ids, counters.clone(), &mut report).await;
        report.absorb_counters(&counters);

        if let Err(e) = outcome {
            report.fail(&e);
            return report;
        }
        if self.cancel.is_cancelled() {
            report.transition(RunState::Cancelled);
            return report;
        }

        if self.config.commit_policy == CommitPolicy::AfterCompletion {
            if let Err(e) = self.sync.commit(delta.watermark).await {
                report.fail(&e);
                return report;
            }
            report.watermark = Some(delta.watermark);
        }

        report.transition(RunState::Completed);
        tracing::info!(
            run_id = %report.run_id,
            fetched = report.fetched,
            enriched = report.enriched,
            published = report.published,
            "Run completed"
        );
        report
    }

    /// Spawn every stage worker and wait for all of them.
    ///
    /// Returns the first fatal error; the remaining workers are aborted
    /// without draining.
    async fn run_stages(
        &self,
        ids: Vec<String>,
        counters: Arc<RunCounters>,
        report: &mut RunReport,
    ) -> Result<()> {
        let capacity = self.config.queue_capacity.max(1);
        let (ingest_tx, ingest_rx) = mpsc::channel(capacity);
        let (enrich_tx, enrich_rx) = mpsc::channel(capacity);
        let ingest_rx = Arc::new(Mutex::new(ingest_rx));
        let enrich_rx = Arc::new(Mutex::new(enrich_rx));

        let token = self.cancel.child_token();
        let mut tasks: JoinSet<(Stage, Result<()>)> = JoinSet::new();

        report.transition(RunState::Ingesting);

        tasks.spawn({
            let source = self.source.clone();
            let counters = counters.clone();
            let token = token.clone();
            async move {
                let result = stages::ingest(ids, source, ingest_tx, counters, token).await;
                (Stage::Ingest, result)
            }
        });

        for _ in 0..self.config.enrich_workers.max(1) {
            let rx = ingest_rx.clone();
            let tx = enrich_tx.clone();
            let enricher = self.enricher.clone();
            let counters = counters.clone();
            let token = token.clone();
            tasks.spawn(async move {
                let result = stages::enrich(rx, enricher, tx, counters, token).await;
                (Stage::Enrich, result)
            });
        }
        // The enrich queue closes once every enrich worker has dropped its sender
        drop(enrich_tx);

        for _ in 0..self.config.publish_workers.max(1) {
            let rx = enrich_rx.clone();
            let router = self.router.clone();
            let counters = counters.clone();
            let token = token.clone();
            tasks.spawn(async move {
                let result = stages::publish(rx, router, counters, token).await;
                (Stage::Publish, result)
            });
        }

        let mut failure: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((stage, Ok(()))) => {
                    tracing::debug!(%stage, "Stage worker finished");
                    if stage == Stage::Ingest && report.state == RunState::Ingesting {
                        report.transition(RunState::Draining);
                    }
                }
                Ok((stage, Err(e))) => {
                    tracing::error!(%stage, error = %e, "Stage worker failed, aborting run");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                    token.cancel();
                    tasks.abort_all();
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(Error::Internal(format!("Stage worker panicked: {}", e)));
                    }
                    token.cancel();
                    tasks.abort_all();
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::LanguageModel;
    use crate::ingest::MailItem;
    use crate::router::{ContainerSchema, Destination, FieldValue, ResourceHandle, ResourceRegistry};
    use crate::sync::{CheckpointStore, Delta};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::{watch, Notify};

    struct FakeSource {
        latest: u64,
        ids: Vec<String>,
        next_watermark: u64,
        failing: Vec<String>,
        /// Number of `get` calls so far
        gets: watch::Sender<usize>,
    }

    impl FakeSource {
        fn new(ids: &[&str], next_watermark: u64) -> Self {
            Self {
                latest: 900,
                ids: ids.iter().map(|s| s.to_string()).collect(),
                next_watermark,
                failing: Vec::new(),
                gets: watch::channel(0).0,
            }
        }
    }

    #[async_trait]
    impl MailSource for FakeSource {
        async fn latest_marker(&self) -> Result<Watermark> {
            Ok(Watermark::new(self.latest).unwrap())
        }

        async fn list_since(&self, _watermark: Watermark) -> Result<Delta> {
            Ok(Delta {
                ids: self.ids.clone(),
                watermark: Watermark::new(self.next_watermark).unwrap(),
            })
        }

        async fn get(&self, id: &str) -> Result<MailItem> {
            self.gets.send_modify(|n| *n += 1);
            if self.failing.iter().any(|f| f == id) {
                return Err(Error::Collaborator(format!("get {} failed", id)));
            }
            Ok(MailItem {
                id: id.to_string(),
                from: "alice@example.com".to_string(),
                to: "bob@example.com".to_string(),
                subject: format!("subject {}", id),
                date: "Tue, 5 Mar 2024 10:00:00 +0000".to_string(),
                body: vec![format!("body {}", id)],
            })
        }
    }

    /// Answers with action items, or garbage for bodies mentioning "garbled".
    /// With a gate set, every call waits on it first.
    #[derive(Default)]
    struct FakeModel {
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl LanguageModel for FakeModel {
        async fn complete(&self, prompt: &str) -> Result<String> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if prompt.contains("garbled") {
                return Ok("no payload here".to_string());
            }
            Ok("[/INST] {'ActionItems':['call client']}".to_string())
        }
    }

    #[derive(Default)]
    struct FakeDestination {
        creates: AtomicUsize,
        entries: std::sync::Mutex<HashMap<String, Vec<String>>>,
        /// Reject every entry write as an invalid credential
        reject_writes: bool,
    }

    #[async_trait]
    impl Destination for FakeDestination {
        async fn create_container(
            &self,
            _parent_id: &str,
            name: &str,
            _schema: &ContainerSchema,
        ) -> Result<ResourceHandle> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(ResourceHandle::new(format!("db-{}", name)))
        }

        async fn create_entry(
            &self,
            container: &ResourceHandle,
            fields: &[(String, FieldValue)],
        ) -> Result<String> {
            if self.reject_writes {
                return Err(Error::Auth("destination returned 401 Unauthorized".to_string()));
            }
            let subject = fields
                .iter()
                .find_map(|(name, value)| match (name.as_str(), value) {
                    ("Subject", FieldValue::RichText(s)) => Some(s.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            let mut entries = self.entries.lock().unwrap();
            let list = entries.entry(container.to_string()).or_default();
            list.push(subject);
            Ok(format!("page-{}", list.len()))
        }
    }

    impl FakeDestination {
        fn entry_count(&self) -> usize {
            self.entries.lock().unwrap().values().map(Vec::len).sum()
        }
    }

    struct Harness {
        dir: TempDir,
        source: Arc<FakeSource>,
        destination: Arc<FakeDestination>,
    }

    impl Harness {
        fn new(source: FakeSource) -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                source: Arc::new(source),
                destination: Arc::new(FakeDestination::default()),
            }
        }

        fn checkpoint(&self) -> CheckpointStore {
            CheckpointStore::new(self.dir.path().join("config.json"))
        }

        fn registry_path(&self) -> std::path::PathBuf {
            self.dir.path().join("databases.json")
        }

        async fn seed_watermark(&self, value: u64) {
            self.checkpoint()
                .commit(Watermark::new(value).unwrap())
                .await
                .unwrap();
        }

        fn pipeline(&self, config: PipelineConfig, model: FakeModel) -> Pipeline {
            let source: Arc<dyn MailSource> = self.source.clone();
            let router = ResourceRouter::new(
                self.destination.clone(),
                "parent",
                ResourceRegistry::new(self.registry_path()),
            );
            Pipeline::new(
                config,
                IncrementalSync::new(self.checkpoint(), source.clone()),
                source,
                Arc::new(Enricher::new(Arc::new(model))),
                Arc::new(router),
            )
        }
    }

    #[tokio::test]
    async fn test_bootstrap_run_processes_nothing() {
        let harness = Harness::new(FakeSource::new(&["201"], 205));
        let report = harness
            .pipeline(PipelineConfig::default(), FakeModel::default())
            .run()
            .await;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.fetched, 0);
        assert_eq!(report.watermark, Watermark::new(900));
        assert_eq!(*harness.source.gets.borrow(), 0);
        assert_eq!(harness.checkpoint().read().await.unwrap(), Watermark::new(900));
    }

    #[tokio::test]
    async fn test_enrich_failure_does_not_block_later_records() {
        let harness = Harness::new(FakeSource::new(&["1", "garbled", "3"], 205));
        harness.seed_watermark(100).await;

        let report = harness
            .pipeline(PipelineConfig::default(), FakeModel::default())
            .run()
            .await;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.dropped_enrich, 1);
        assert_eq!(report.published, 2);

        let entries = harness.destination.entries.lock().unwrap();
        assert_eq!(
            entries["db-2024-03-05"],
            vec!["subject 1".to_string(), "subject 3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_ingest_failure_skips_record() {
        let mut source = FakeSource::new(&["1", "2", "3"], 205);
        source.failing = vec!["2".to_string()];
        let harness = Harness::new(source);
        harness.seed_watermark(100).await;

        let report = harness
            .pipeline(PipelineConfig::default(), FakeModel::default())
            .run()
            .await;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.skipped_ingest, 1);
        assert_eq!(report.published, 2);
        assert_eq!(harness.checkpoint().read().await.unwrap(), Watermark::new(205));
    }

    #[tokio::test]
    async fn test_empty_delta_commits_new_watermark() {
        let harness = Harness::new(FakeSource::new(&[], 130));
        harness.seed_watermark(100).await;

        let report = harness
            .pipeline(PipelineConfig::default(), FakeModel::default())
            .run()
            .await;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.watermark, Watermark::new(130));
        assert_eq!(harness.checkpoint().read().await.unwrap(), Watermark::new(130));
    }

    #[tokio::test]
    async fn test_backpressure_then_cancel() {
        let ids: Vec<String> = (1..=20).map(|i| i.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let harness = Harness::new(FakeSource::new(&id_refs, 205));
        harness.seed_watermark(100).await;

        let capacity = 3;
        let config = PipelineConfig {
            queue_capacity: capacity,
            ..Default::default()
        };
        let model = FakeModel {
            gate: Some(Arc::new(Notify::new())),
        };
        let pipeline = Arc::new(harness.pipeline(config, model));
        let cancel = pipeline.cancellation_token();

        let running = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run().await }
        });

        // One record held by the stalled enrich worker, `capacity` queued,
        // and one fetched record waiting for a free slot
        let mut gets = harness.source.gets.subscribe();
        tokio::time::timeout(Duration::from_secs(5), gets.wait_for(|n| *n >= capacity + 2))
            .await
            .expect("ingest must fill the queue")
            .unwrap();
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*harness.source.gets.borrow(), capacity + 2);

        cancel.cancel();
        let report = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("cancelled run must finish")
            .unwrap();

        assert_eq!(report.state, RunState::Cancelled);
        assert_eq!(report.published, 0);
        assert_eq!(harness.checkpoint().read().await.unwrap(), Watermark::new(100));
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_without_commit() {
        let harness = Harness::new(FakeSource::new(&["1", "2"], 205));
        harness.seed_watermark(100).await;
        std::fs::write(harness.registry_path(), "not json").unwrap();

        let report = harness
            .pipeline(PipelineConfig::default(), FakeModel::default())
            .run()
            .await;

        assert_eq!(report.state, RunState::FailedFatal);
        assert!(report.error.as_deref().unwrap().contains("Persistence"));
        assert_eq!(harness.destination.creates.load(Ordering::SeqCst), 0);
        assert_eq!(harness.checkpoint().read().await.unwrap(), Watermark::new(100));
    }

    #[tokio::test]
    async fn test_rejected_destination_credential_fails_run() {
        let mut harness = Harness::new(FakeSource::new(&["1", "2", "3"], 205));
        harness.destination = Arc::new(FakeDestination {
            reject_writes: true,
            ..Default::default()
        });
        harness.seed_watermark(100).await;

        let report = harness
            .pipeline(PipelineConfig::default(), FakeModel::default())
            .run()
            .await;

        assert_eq!(report.state, RunState::FailedFatal);
        assert_eq!(report.published, 0);
        assert!(report.error.as_deref().unwrap().contains("Auth"));
        assert_eq!(report.watermark, Watermark::new(100));
        assert_eq!(harness.checkpoint().read().await.unwrap(), Watermark::new(100));
    }

    #[tokio::test]
    async fn test_commit_before_pipeline_survives_fatal_error() {
        let harness = Harness::new(FakeSource::new(&["1"], 205));
        harness.seed_watermark(100).await;
        std::fs::write(harness.registry_path(), "not json").unwrap();

        let config = PipelineConfig {
            commit_policy: CommitPolicy::BeforePipeline,
            ..Default::default()
        };
        let report = harness.pipeline(config, FakeModel::default()).run().await;

        assert_eq!(report.state, RunState::FailedFatal);
        assert_eq!(report.watermark, Watermark::new(205));
        assert_eq!(harness.checkpoint().read().await.unwrap(), Watermark::new(205));
    }

    #[tokio::test]
    async fn test_parallel_workers_create_one_container() {
        let ids: Vec<String> = (1..=24).map(|i| i.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let harness = Harness::new(FakeSource::new(&id_refs, 300));
        harness.seed_watermark(100).await;

        let config = PipelineConfig {
            queue_capacity: 4,
            enrich_workers: 3,
            publish_workers: 4,
            ..Default::default()
        };
        let report = harness.pipeline(config, FakeModel::default()).run().await;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.published, 24);
        assert_eq!(harness.destination.creates.load(Ordering::SeqCst), 1);
        assert_eq!(harness.destination.entry_count(), 24);

        let registry = ResourceRegistry::read_entries(&harness.registry_path())
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_terminal_states() {
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
        assert!(RunState::FailedFatal.is_terminal());
        assert!(!RunState::Draining.is_terminal());
    }
}
