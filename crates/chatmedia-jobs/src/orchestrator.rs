//! Batch orchestrator for attachment downloads.
//!
//! Walks every owning record, drives each attachment that still needs work
//! through normalize, resolve and store, and saves each changed record once.
//! Records are processed by at most `max_concurrent_records` workers; one
//! record is never handled by two workers at the same time.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chatmedia_core::{
    build_file_name, defaults, normalize, refine_extension, AttachmentDescriptor, AttachmentEntry,
    DownloadOutcome, DownloadResult, DownloadStateTracker, DownloadStatus, Error, FailureKind,
    FailureReason, MediaFetcher, MediaStorage, NormalizeError, RecordStore, Result,
};
use chatmedia_fetch::AuthContext;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::chain::{ChainConfig, ResolutionChain};
use crate::throttle::HostThrottle;

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Configuration for the batch orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Minimum spacing between two requests to the same host, in milliseconds.
    pub delay_ms: u64,
    /// Owning records processed concurrently.
    pub max_concurrent_records: usize,
    /// Reprocess completed attachments even when their file exists.
    pub force: bool,
    pub chain: ChainConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            delay_ms: defaults::DOWNLOAD_DELAY_MS,
            max_concurrent_records: defaults::MAX_CONCURRENT_RECORDS,
            force: false,
            chain: ChainConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CHATMEDIA_DELAY_MS` | `1500` | Per-host delay between requests |
    /// | `CHATMEDIA_MAX_CONCURRENT_RECORDS` | `1` | Records processed concurrently |
    /// | `CHATMEDIA_FORCE` | `false` | Reprocess completed attachments |
    ///
    /// Chain settings come from [`ChainConfig::from_env`].
    pub fn from_env() -> Self {
        let force = std::env::var(defaults::ENV_FORCE)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Self {
            delay_ms: env_parse(defaults::ENV_DELAY_MS, defaults::DOWNLOAD_DELAY_MS),
            max_concurrent_records: env_parse(
                defaults::ENV_MAX_CONCURRENT_RECORDS,
                defaults::MAX_CONCURRENT_RECORDS,
            )
            .max(1),
            force,
            chain: ChainConfig::from_env(),
        }
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn with_max_concurrent_records(mut self, max: usize) -> Self {
        self.max_concurrent_records = max.max(1);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_chain_config(mut self, chain: ChainConfig) -> Self {
        self.chain = chain;
        self
    }
}

// =============================================================================
// SUMMARY AND EVENTS
// =============================================================================

/// Run-level counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Attachments seen, skipped ones included.
    pub total: usize,
    /// Already resolved and left alone.
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Owning records with at least one attachment.
    pub records_seen: usize,
    pub records_saved: usize,
    /// The run stopped early on a shutdown signal.
    pub cancelled: bool,
}

impl RunSummary {
    /// Percentage of processed attachments that succeeded.
    ///
    /// A run that processed nothing reports 100.
    pub fn success_rate(&self) -> f64 {
        let processed = self.succeeded + self.failed;
        if processed == 0 {
            return 100.0;
        }
        self.succeeded as f64 * 100.0 / processed as f64
    }

    pub fn merge(&mut self, other: &RunSummary) {
        self.total += other.total;
        self.skipped += other.skipped;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.records_seen += other.records_seen;
        self.records_saved += other.records_saved;
        self.cancelled |= other.cancelled;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attachments: {} skipped, {} succeeded, {} failed ({:.1}% success) in {} records ({} saved)",
            self.total,
            self.skipped,
            self.succeeded,
            self.failed,
            self.success_rate(),
            self.records_seen,
            self.records_saved
        )?;
        if self.cancelled {
            f.write_str(", cancelled")?;
        }
        Ok(())
    }
}

/// Event emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A run started over this many owning records.
    RunStarted { records: usize },
    /// A record with attachments is being processed.
    RecordStarted { record_id: String },
    /// An attachment was already resolved.
    AttachmentSkipped {
        record_id: String,
        message_key: String,
        index: usize,
    },
    /// An attachment was downloaded and stored.
    AttachmentCompleted {
        record_id: String,
        message_key: String,
        index: usize,
        method: String,
        path: PathBuf,
        byte_size: u64,
    },
    /// An attachment could not be resolved.
    AttachmentFailed {
        record_id: String,
        message_key: String,
        index: usize,
        kind: FailureKind,
    },
    /// A changed record was persisted.
    RecordSaved { record_id: String },
    /// The run ended.
    RunFinished { summary: RunSummary },
}

// =============================================================================
// SHUTDOWN
// =============================================================================

/// Cooperative cancellation shared by the orchestrator and its controller.
///
/// Once triggered, workers finish the attachment in flight, save their record
/// and stop.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal has been triggered.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as self, so this only ends on trigger
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Handle for a run started with [`BatchOrchestrator::start`].
pub struct OrchestratorHandle {
    shutdown: ShutdownSignal,
    event_rx: broadcast::Receiver<PipelineEvent>,
    task: JoinHandle<Result<RunSummary>>,
}

impl OrchestratorHandle {
    /// Ask the run to stop after the attachments in flight.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Get a receiver for pipeline events.
    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the run to finish.
    pub async fn join(self) -> Result<RunSummary> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("orchestrator task failed: {}", e)))?
    }
}

/// Drives every owning record through the download pipeline.
pub struct BatchOrchestrator {
    records: Arc<dyn RecordStore>,
    media: Arc<dyn MediaStorage>,
    chain: Arc<ResolutionChain>,
    auth: Arc<AuthContext>,
    tracker: DownloadStateTracker,
    config: OrchestratorConfig,
    event_tx: broadcast::Sender<PipelineEvent>,
    shutdown: ShutdownSignal,
}

impl BatchOrchestrator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        media: Arc<dyn MediaStorage>,
        fetcher: Arc<dyn MediaFetcher>,
        auth: Arc<AuthContext>,
        config: OrchestratorConfig,
    ) -> Self {
        let throttle = Arc::new(HostThrottle::new(Duration::from_millis(config.delay_ms)));
        let chain = ResolutionChain::new(fetcher, throttle).with_config(config.chain.clone());
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            records,
            media,
            chain: Arc::new(chain),
            auth,
            tracker: DownloadStateTracker::new().with_force(config.force),
            config,
            event_tx,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Use an externally owned shutdown signal (e.g. wired to Ctrl-C).
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Get a receiver for pipeline events.
    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Spawn the run and return a handle for control.
    pub fn start(self) -> OrchestratorHandle {
        let shutdown = self.shutdown.clone();
        let event_rx = self.event_tx.subscribe();
        let task = tokio::spawn(async move { self.run().await });
        OrchestratorHandle {
            shutdown,
            event_rx,
            task,
        }
    }

    /// Process every owning record once.
    ///
    /// Per-attachment failures are recorded on the records. An error is
    /// returned only when the run itself cannot continue: no token from a
    /// configured provider, or an unreachable record store.
    #[instrument(skip(self), fields(subsystem = "orchestrator"))]
    pub async fn run(&self) -> Result<RunSummary> {
        let start = Instant::now();
        self.auth.prime().await.map_err(|e| {
            error!(error = %e, "Cannot obtain an access token, aborting run");
            e
        })?;

        let ids = self.records.list_record_ids().await.map_err(|e| {
            error!(error = %e, "Cannot list owning records, aborting run");
            e
        })?;

        info!(
            records = ids.len(),
            max_concurrent = self.config.max_concurrent_records,
            delay_ms = self.config.delay_ms,
            force = self.config.force,
            "Attachment download run started"
        );
        let _ = self.event_tx.send(PipelineEvent::RunStarted { records: ids.len() });

        let mut summary = RunSummary::default();
        let mut fatal: Option<Error> = None;
        let mut tasks = JoinSet::new();
        let max_concurrent = self.config.max_concurrent_records.max(1);

        for id in ids {
            while tasks.len() >= max_concurrent {
                self.join_one(&mut tasks, &mut summary, &mut fatal).await;
            }
            if self.shutdown.is_triggered() || fatal.is_some() {
                break;
            }
            let worker = self.clone_refs();
            tasks.spawn(async move { worker.process_record(&id).await });
        }
        while !tasks.is_empty() {
            self.join_one(&mut tasks, &mut summary, &mut fatal).await;
        }

        summary.cancelled |= self.shutdown.is_triggered() && fatal.is_none();
        if let Some(e) = fatal {
            error!(error = %e, "Run aborted");
            return Err(e);
        }

        info!(
            total = summary.total,
            skipped = summary.skipped,
            succeeded = summary.succeeded,
            failed = summary.failed,
            records_saved = summary.records_saved,
            success_rate = summary.success_rate(),
            cancelled = summary.cancelled,
            duration_ms = start.elapsed().as_millis() as u64,
            "Attachment download run finished"
        );
        let _ = self.event_tx.send(PipelineEvent::RunFinished { summary });
        Ok(summary)
    }

    async fn join_one(
        &self,
        tasks: &mut JoinSet<Result<RunSummary>>,
        summary: &mut RunSummary,
        fatal: &mut Option<Error>,
    ) {
        let result = match tasks.join_next().await {
            Some(result) => result,
            None => return,
        };
        match result {
            Ok(Ok(record_summary)) => summary.merge(&record_summary),
            Ok(Err(e)) => {
                // Let the other workers finish their record and stop
                self.shutdown.trigger();
                fatal.get_or_insert(e);
            }
            Err(e) => {
                error!(error = ?e, "Record task panicked");
                self.shutdown.trigger();
                fatal.get_or_insert(Error::Internal(format!("record task panicked: {}", e)));
            }
        }
    }

    /// Clone references needed for spawned record tasks.
    fn clone_refs(&self) -> RecordWorker {
        RecordWorker {
            records: self.records.clone(),
            media: self.media.clone(),
            chain: self.chain.clone(),
            auth: self.auth.clone(),
            tracker: self.tracker,
            event_tx: self.event_tx.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Position of one attachment, for logs and events.
struct AttachmentKey<'a> {
    record_id: &'a str,
    message_key: &'a str,
    index: usize,
}

/// Owned handles used by one record task.
///
/// This avoids requiring `Arc<BatchOrchestrator>` for `JoinSet::spawn`.
struct RecordWorker {
    records: Arc<dyn RecordStore>,
    media: Arc<dyn MediaStorage>,
    chain: Arc<ResolutionChain>,
    auth: Arc<AuthContext>,
    tracker: DownloadStateTracker,
    event_tx: broadcast::Sender<PipelineEvent>,
    shutdown: ShutdownSignal,
}

impl RecordWorker {
    /// Resolve every attachment of one record and save it if anything changed.
    async fn process_record(&self, id: &str) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut record = match self.records.load(id).await {
            Ok(record) => record,
            Err(e @ (Error::Serialization(_) | Error::NotFound(_))) => {
                warn!(record_id = %id, error = %e, "Skipping unreadable record");
                return Ok(summary);
            }
            Err(e) => return Err(e),
        };
        if !record.has_attachments() {
            trace!(record_id = %id, "Record has no attachments");
            return Ok(summary);
        }

        summary.records_seen = 1;
        let record_id = record.id.clone();
        let _ = self.event_tx.send(PipelineEvent::RecordStarted {
            record_id: record_id.clone(),
        });
        debug!(record_id = %record_id, attachments = record.attachment_count(), "Processing record");

        let mut changed = false;
        'messages: for (message_index, message) in record.messages.iter_mut().enumerate() {
            let message_key = message.key(message_index);
            for (index, entry) in message.attachments.iter_mut().enumerate() {
                if self.shutdown.is_triggered() {
                    info!(record_id = %record_id, "Shutdown requested, stopping after current attachment");
                    summary.cancelled = true;
                    break 'messages;
                }
                let key = AttachmentKey {
                    record_id: &record_id,
                    message_key: &message_key,
                    index,
                };
                changed |= self.process_attachment(&key, entry, &mut summary).await?;
            }
        }

        if changed {
            self.records.save(id, &record).await.map_err(|e| {
                error!(record_id = %record_id, error = %e, "Failed to save record");
                e
            })?;
            summary.records_saved = 1;
            let _ = self.event_tx.send(PipelineEvent::RecordSaved {
                record_id: record_id.clone(),
            });
            debug!(record_id = %record_id, "Record saved");
        }
        Ok(summary)
    }

    /// Drive one attachment end to end. Returns whether its outcome changed.
    async fn process_attachment(
        &self,
        key: &AttachmentKey<'_>,
        entry: &mut AttachmentEntry,
        summary: &mut RunSummary,
    ) -> Result<bool> {
        let descriptor = match normalize(&entry.raw) {
            Ok(descriptor) => descriptor,
            Err(NormalizeError::NotAnAttachment(reason)) => {
                trace!(
                    record_id = %key.record_id,
                    message_id = %key.message_key,
                    attachment_index = key.index,
                    reason = %reason,
                    "Ignoring non-attachment entry"
                );
                return Ok(false);
            }
        };
        summary.total += 1;

        let outcome = entry.download.get_or_insert_with(DownloadOutcome::pending);
        if !self.tracker.should_process(outcome).await {
            summary.skipped += 1;
            trace!(
                record_id = %key.record_id,
                message_id = %key.message_key,
                attachment_index = key.index,
                "Attachment already resolved"
            );
            let _ = self.event_tx.send(PipelineEvent::AttachmentSkipped {
                record_id: key.record_id.to_string(),
                message_key: key.message_key.to_string(),
                index: key.index,
            });
            return Ok(false);
        }

        let previous = match outcome.status {
            DownloadStatus::Completed => outcome.local_path.clone(),
            _ => None,
        };
        self.tracker.record_start(outcome)?;

        match self.download(&descriptor).await {
            Ok(result) => {
                info!(
                    record_id = %key.record_id,
                    message_id = %key.message_key,
                    attachment_index = key.index,
                    method = %result.method,
                    byte_size = result.byte_size,
                    path = %result.local_path.display(),
                    "Attachment downloaded"
                );
                self.tracker.record_success(outcome, &result)?;
                if let Some(old) = previous.filter(|old| *old != result.local_path) {
                    self.remove_replaced(&old).await;
                }
                summary.succeeded += 1;
                let _ = self.event_tx.send(PipelineEvent::AttachmentCompleted {
                    record_id: key.record_id.to_string(),
                    message_key: key.message_key.to_string(),
                    index: key.index,
                    method: result.method,
                    path: result.local_path,
                    byte_size: result.byte_size,
                });
            }
            Err(reason) => {
                warn!(
                    record_id = %key.record_id,
                    message_id = %key.message_key,
                    attachment_index = key.index,
                    attachment = descriptor.label(),
                    failure_kind = %reason.kind,
                    error = %reason.message,
                    "Attachment download failed"
                );
                let kind = reason.kind;
                self.tracker.record_failure(outcome, reason)?;
                summary.failed += 1;
                let _ = self.event_tx.send(PipelineEvent::AttachmentFailed {
                    record_id: key.record_id.to_string(),
                    message_key: key.message_key.to_string(),
                    index: key.index,
                    kind,
                });
            }
        }
        Ok(true)
    }

    /// Resolve and store one attachment.
    async fn download(
        &self,
        descriptor: &AttachmentDescriptor,
    ) -> std::result::Result<DownloadResult, FailureReason> {
        if !descriptor.has_sources() {
            return Err(FailureReason::no_source_available());
        }
        let resolved = self.chain.resolve(descriptor, &self.auth).await?;
        let bytes = &resolved.payload.bytes;

        let file_name = build_file_name(
            &resolved.method,
            Utc::now(),
            &refine_extension(&descriptor.file_name, bytes),
        );
        let stored = self
            .media
            .write_unique(&file_name, bytes)
            .await
            .map_err(|e| FailureReason::storage(e.to_string()))?;

        Ok(DownloadResult {
            method: resolved.method,
            local_path: stored.path,
            byte_size: stored.byte_size,
        })
    }

    async fn remove_replaced(&self, old: &Path) {
        match self.media.remove(old).await {
            Ok(()) => debug!(path = %old.display(), "Removed replaced file"),
            Err(e) => warn!(path = %old.display(), error = %e, "Failed to remove replaced file"),
        }
    }
}
