//! SyncActor - Persists buffered samples to the durable backend
//!
//! ## Flush
//!
//! Every `flush_interval` the actor copies the dirty tail of each ring buffer
//! and appends it to the backend, one batch per key. A key is only marked
//! synced after its batch was written; a failed batch stays dirty and is sent
//! again on the next tick. Ingestion never waits on any of this.
//!
//! ## Retention
//!
//! With `retention_days` set, rows older than the window are deleted once at
//! startup and then every `cleanup_interval`.
//!
//! ## Shutdown
//!
//! On cancellation the actor performs one final flush and closes the backend.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{FlushReport, SyncCommand, SyncStats};
use crate::buffer::RingStore;
use crate::error::{PipelineError, PipelineResult};
use crate::samples::Sample;
use crate::storage::{CleanupReport, StorageBackend, StorageError, StorageResult, Table};
use crate::store::TelemetryStore;

/// Timing and retention knobs for the sync loop
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub flush_interval: Duration,
    pub cleanup_interval: Duration,
    pub retention_days: Option<u32>,
}

/// Result of flushing one sample table
#[derive(Debug, Default)]
struct TableFlush {
    written: u64,
    failed: usize,
    error: Option<StorageError>,
}

pub struct SyncActor {
    store: Arc<TelemetryStore>,
    backend: Arc<dyn StorageBackend>,
    settings: SyncSettings,
    command_rx: mpsc::Receiver<SyncCommand>,
    cancel: CancellationToken,
    stats: SyncStats,
}

impl SyncActor {
    pub fn new(
        store: Arc<TelemetryStore>,
        backend: Arc<dyn StorageBackend>,
        settings: SyncSettings,
        command_rx: mpsc::Receiver<SyncCommand>,
        cancel: CancellationToken,
    ) -> Self {
        if let Some(days) = settings.retention_days {
            debug!("retention cleanup enabled: {} days", days);
        }

        Self {
            store,
            backend,
            settings,
            command_rx,
            cancel,
            stats: SyncStats::default(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting sync actor (flush every {:?})",
            self.settings.flush_interval
        );

        let mut flush_interval = time::interval_at(
            Instant::now() + self.settings.flush_interval,
            self.settings.flush_interval,
        );
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // First tick fires immediately, so cleanup also runs once at startup
        let mut cleanup_interval = time::interval(self.settings.cleanup_interval);
        cleanup_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let has_retention = self.settings.retention_days.is_some();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("sync actor cancelled");
                    break;
                }

                _ = flush_interval.tick() => {
                    if self.store.has_unsynced() {
                        trace!("time-based flush triggered");
                        let _ = self.flush().await;
                    }
                }

                _ = cleanup_interval.tick(), if has_retention => {
                    debug!("retention cleanup triggered");
                    if let Err(e) = self.cleanup().await {
                        error!("failed to clean up old rows: {}", e);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd).await;
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        if self.store.has_unsynced() {
            debug!("final flush before shutdown");
            if let Err(e) = self.flush().await {
                error!("final flush incomplete: {}", e);
            }
        }

        debug!("closing backend");
        if let Err(e) = self.backend.close().await {
            error!("error closing backend: {}", e);
        }

        debug!("sync actor stopped");
    }

    async fn handle_command(&mut self, cmd: SyncCommand) {
        match cmd {
            SyncCommand::Flush { respond_to } => {
                debug!("manual flush requested");
                let result = self.flush().await;
                let _ = respond_to.send(result.map_err(PipelineError::from));
            }

            SyncCommand::Cleanup { respond_to } => {
                let result = self.cleanup().await;
                let _ = respond_to.send(result.map_err(PipelineError::from));
            }

            SyncCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats.clone());
            }
        }
    }

    /// Write every dirty batch; returns the first error if any batch failed
    async fn flush(&mut self) -> StorageResult<FlushReport> {
        let backend = self.backend.as_ref();

        let metrics = flush_store(&self.store.metrics, Table::Metrics, move |rows| {
            backend.insert_metrics(rows)
        })
        .await;
        let logs = flush_store(&self.store.logs, Table::Logs, move |rows| {
            backend.insert_logs(rows)
        })
        .await;
        let events = flush_store(&self.store.events, Table::Events, move |rows| {
            backend.insert_events(rows)
        })
        .await;
        let snapshots = flush_store(&self.store.snapshots, Table::Snapshots, move |rows| {
            backend.insert_snapshots(rows)
        })
        .await;

        let report = FlushReport {
            metrics: metrics.written,
            logs: logs.written,
            events: events.written,
            snapshots: snapshots.written,
            failed_batches: metrics.failed + logs.failed + events.failed + snapshots.failed,
        };

        self.stats.rows_written += report.rows();
        self.stats.last_flush = Some(self.store.now());

        let first_error = [metrics.error, logs.error, events.error, snapshots.error]
            .into_iter()
            .flatten()
            .next();

        match first_error {
            None => {
                self.stats.flushes += 1;
                trace!(
                    "flush #{} complete ({} rows)",
                    self.stats.flushes,
                    report.rows()
                );
                Ok(report)
            }
            Some(e) => {
                self.stats.failed_flushes += 1;
                warn!(
                    "flush left {} batch(es) dirty, retrying next tick",
                    report.failed_batches
                );
                Err(e)
            }
        }
    }

    async fn cleanup(&mut self) -> StorageResult<CleanupReport> {
        let Some(days) = self.settings.retention_days else {
            return Ok(CleanupReport::default());
        };

        let cutoff = self.store.now() - TimeDelta::days(days as i64);
        debug!("running retention cleanup (deleting data before {})", cutoff);

        let report = self.backend.cleanup_before(cutoff).await?;

        self.stats.cleanups += 1;
        self.stats.rows_deleted += report.total();
        self.stats.last_cleanup = Some(self.store.now());

        if report.total() > 0 {
            info!(
                "retention cleanup deleted {} rows (total: {})",
                report.total(),
                self.stats.rows_deleted
            );
        } else {
            trace!("retention cleanup: nothing to delete");
        }

        Ok(report)
    }
}

/// Append the dirty batches of one store, marking each key synced on success
async fn flush_store<K, T, F, Fut>(store: &RingStore<K, T>, table: Table, write: F) -> TableFlush
where
    K: Eq + Hash + Clone + Debug,
    T: Sample,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = StorageResult<u64>>,
{
    let mut result = TableFlush::default();

    for batch in store.take_unsynced() {
        let count = batch.samples.len();
        match write(batch.samples).await {
            Ok(written) => {
                store.mark_synced(&batch.key, batch.through);
                result.written += written;
            }
            Err(e) => {
                error!(%table, key = ?batch.key, "failed to flush {} samples: {}", count, e);
                result.failed += 1;
                if result.error.is_none() {
                    result.error = Some(e);
                }
            }
        }
    }

    result
}

/// Handle for controlling the SyncActor
#[derive(Clone)]
pub struct SyncHandle {
    sender: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    /// Spawn a new sync actor; it runs until `cancel` fires
    pub fn spawn(
        store: Arc<TelemetryStore>,
        backend: Arc<dyn StorageBackend>,
        settings: SyncSettings,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SyncActor::new(store, backend, settings, cmd_rx, cancel);
        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    /// Manually flush all dirty buffers
    pub async fn flush(&self) -> PipelineResult<FlushReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SyncCommand::Flush { respond_to: tx })
            .await
            .map_err(|_| PipelineError::NotRunning("sync"))?;

        rx.await.map_err(|_| PipelineError::NotRunning("sync"))?
    }

    /// Manually run the durable retention cleanup
    pub async fn cleanup(&self) -> PipelineResult<CleanupReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SyncCommand::Cleanup { respond_to: tx })
            .await
            .map_err(|_| PipelineError::NotRunning("sync"))?;

        rx.await.map_err(|_| PipelineError::NotRunning("sync"))?
    }

    pub async fn get_stats(&self) -> PipelineResult<SyncStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SyncCommand::GetStats { respond_to: tx })
            .await
            .map_err(|_| PipelineError::NotRunning("sync"))?;

        rx.await.map_err(|_| PipelineError::NotRunning("sync"))
    }
}
