//! Pipeline assembly and lifecycle
//!
//! A [`Pipeline`] is built explicitly from a [`Config`] through
//! [`PipelineBuilder`]; there is no global instance. Building opens the durable
//! store, warms the metric buffers from it and loads the configured rules.
//! `start` spawns the background loops and `stop` cancels them and waits for
//! each one with a bounded timeout.
//!
//! ## Example
//!
//! ```no_run
//! # use plugin_telemetry::{Config, PipelineBuilder, MetricKind, Metadata};
//! # async fn example() -> anyhow::Result<()> {
//! let pipeline = PipelineBuilder::new(Config::in_memory()).build().await?;
//! pipeline.start()?;
//!
//! pipeline.record_metric("payments", MetricKind::Cpu, 42.0, Metadata::new())?;
//! let summary = pipeline.query().summary("payments");
//! println!("{:?}", summary.status);
//!
//! pipeline.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::actors::{
    DispatchHandle, DispatchSettings, DispatchStats, EvaluationReport, EvaluatorHandle,
    FlushReport, RetentionHandle, RetentionReport, RetentionSettings, SyncHandle, SyncSettings,
    SyncStats,
};
use crate::alerts::{Alert, AlertId, AlertStore};
use crate::channels::{ChannelAdapter, ChannelRegistry};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StorageConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::query::QueryFacade;
use crate::rules::{AlertRule, RuleEngine, RulePatch, RuleStats};
use crate::samples::{
    Event, LogEntry, LogLevel, Metadata, Metric, MetricKind, Snapshot, SnapshotFields,
};
use crate::storage::{CleanupReport, HealthStatus, StorageBackend};
use crate::store::{IngestStats, TelemetryStore};
use crate::util::{hours, to_time_delta};

/// Builder for [`Pipeline`]
///
/// Anything not injected is derived from the configuration: the system clock,
/// the backend named by `storage` and the channels enabled under `channels`.
pub struct PipelineBuilder {
    config: Config,
    clock: Arc<dyn Clock>,
    backend: Option<Arc<dyn StorageBackend>>,
    adapters: Vec<Arc<dyn ChannelAdapter>>,
}

impl PipelineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            backend: None,
            adapters: Vec::new(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use this backend instead of opening the configured one
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Add (or replace) the adapter for the adapter's channel
    pub fn channel(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    #[instrument(skip_all)]
    pub async fn build(self) -> PipelineResult<Pipeline> {
        let PipelineBuilder {
            config,
            clock,
            backend,
            adapters,
        } = self;

        config.validate()?;

        let backend = match backend {
            Some(backend) => Some(backend),
            None => open_backend(&config.storage).await?,
        };

        let store = Arc::new(TelemetryStore::new(&config.buffers, clock));
        if config.retention.warm_start {
            if let Some(backend) = &backend {
                warm_start(&store, backend.as_ref(), &config).await;
            }
        }

        let alerts = Arc::new(AlertStore::new());
        let engine = Arc::new(RuleEngine::new(alerts.clone()));
        for rule in config.rules.iter().cloned() {
            engine.add_rule(rule)?;
        }

        let mut registry = ChannelRegistry::from_config(&config.channels);
        for adapter in adapters {
            registry.register(adapter);
        }

        let query = QueryFacade::new(
            store.clone(),
            alerts.clone(),
            backend.clone(),
            to_time_delta(config.staleness()),
            chrono::TimeDelta::seconds(config.collection.snapshot_interval_secs as i64),
        );

        info!(
            "pipeline built ({} rule(s), channels: {:?}, durable store: {})",
            config.rules.len(),
            registry.channels(),
            backend.is_some()
        );

        Ok(Pipeline {
            config,
            store,
            alerts,
            engine,
            registry: Arc::new(registry),
            backend,
            query,
            running: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }
}

async fn open_backend(storage: &StorageConfig) -> PipelineResult<Option<Arc<dyn StorageBackend>>> {
    match storage {
        StorageConfig::None => Ok(None),

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            let backend: Arc<dyn StorageBackend> =
                Arc::new(crate::storage::sqlite::SqliteBackend::new(path).await?);
            Ok(Some(backend))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(PipelineError::Config(
            "sqlite storage requires the `storage-sqlite` feature".to_string(),
        )),
    }
}

/// Seed the metric buffers with the last `memory_hours` of durable history
async fn warm_start(store: &TelemetryStore, backend: &dyn StorageBackend, config: &Config) {
    let since = store.now() - hours(config.retention.memory_hours);
    match backend.query_recent_metrics(since).await {
        Ok(history) => {
            let restored = store.restore_metrics(history);
            info!("warm start restored {} metric(s) since {}", restored, since);
        }
        Err(e) => warn!("warm start skipped, durable read failed: {}", e),
    }
}

/// Handles of the running background loops
struct Running {
    cancel: CancellationToken,
    evaluator: EvaluatorHandle,
    dispatcher: DispatchHandle,
    retention: RetentionHandle,
    sync: Option<SyncHandle>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// The telemetry and alerting pipeline
pub struct Pipeline {
    config: Config,
    store: Arc<TelemetryStore>,
    alerts: Arc<AlertStore>,
    engine: Arc<RuleEngine>,
    registry: Arc<ChannelRegistry>,
    backend: Option<Arc<dyn StorageBackend>>,
    query: QueryFacade,
    running: Mutex<Option<Running>>,
    /// Set by `stop`; the backend is closed and the pipeline cannot restart
    stopped: AtomicBool,
}

impl Pipeline {
    /// Spawn the evaluation, dispatch, retention and (with a backend) sync loops
    pub fn start(&self) -> PipelineResult<()> {
        let mut running = self.running.lock();
        if self.stopped.load(Ordering::SeqCst) {
            return Err(PipelineError::InvalidState(
                "pipeline was stopped and cannot be restarted".to_string(),
            ));
        }
        if running.is_some() {
            return Err(PipelineError::InvalidState(
                "pipeline is already running".to_string(),
            ));
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let (dispatcher, task) = DispatchHandle::spawn(
            self.registry.clone(),
            self.alerts.clone(),
            DispatchSettings {
                dispatch_interval: self.config.dispatch_interval(),
                send_timeout: self.config.send_timeout(),
            },
            cancel.clone(),
        );
        tasks.push(("dispatcher", task));

        let (evaluator, task) = EvaluatorHandle::spawn(
            self.store.clone(),
            self.engine.clone(),
            dispatcher.clone(),
            self.config.evaluation_interval(),
            cancel.clone(),
        );
        tasks.push(("evaluator", task));

        let (retention, task) = RetentionHandle::spawn(
            self.store.clone(),
            self.alerts.clone(),
            RetentionSettings {
                interval: self.config.memory_cleanup_interval(),
                memory_window: hours(self.config.retention.memory_hours),
                alert_history: chrono::TimeDelta::days(
                    self.config.retention.alert_history_days as i64,
                ),
            },
            cancel.clone(),
        );
        tasks.push(("retention", task));

        let sync = self.backend.clone().map(|backend| {
            let (sync, task) = SyncHandle::spawn(
                self.store.clone(),
                backend,
                SyncSettings {
                    flush_interval: self.config.flush_interval(),
                    cleanup_interval: self.config.durable_cleanup_interval(),
                    retention_days: self.config.retention_days(),
                },
                cancel.clone(),
            );
            tasks.push(("sync", task));
            sync
        });

        info!("pipeline started ({} background loops)", tasks.len());
        *running = Some(Running {
            cancel,
            evaluator,
            dispatcher,
            retention,
            sync,
            tasks,
        });
        Ok(())
    }

    /// Cancel every loop and wait for each, bounded by the drain timeout
    ///
    /// The dispatcher drains its queue and the sync loop does a final flush
    /// before they exit. A loop that overruns the timeout is aborted.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            debug!("stop called on a pipeline that is not running");
            return;
        };

        self.stopped.store(true, Ordering::SeqCst);
        running.cancel.cancel();
        let drain_timeout = self.config.drain_timeout();

        for (name, mut task) in running.tasks {
            match tokio::time::timeout(drain_timeout, &mut task).await {
                Ok(Ok(())) => debug!("{} stopped", name),
                Ok(Err(e)) => error!("{} loop failed: {}", name, e),
                Err(_) => {
                    warn!("{} did not stop within {:?}, aborting", name, drain_timeout);
                    task.abort();
                }
            }
        }

        info!("pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    /// Read side: summaries, histories and alert views
    pub fn query(&self) -> &QueryFacade {
        &self.query
    }

    // Ingestion

    pub fn register_entity(&self, entity_id: &str, label: &str) {
        self.store.register_entity(entity_id, label);
    }

    pub fn record_metric(
        &self,
        entity_id: &str,
        kind: MetricKind,
        value: f64,
        metadata: Metadata,
    ) -> PipelineResult<Metric> {
        self.store.record_metric(entity_id, kind, value, metadata)
    }

    /// Record a metric whose kind is given by name, e.g. `cpu_usage`
    pub fn record_named_metric(
        &self,
        entity_id: &str,
        kind: &str,
        value: f64,
        metadata: Metadata,
    ) -> PipelineResult<Metric> {
        self.store
            .record_named_metric(entity_id, kind, value, metadata)
    }

    pub fn record_log(
        &self,
        entity_id: &str,
        level: LogLevel,
        message: &str,
        context: Metadata,
        stack_trace: Option<String>,
    ) -> PipelineResult<LogEntry> {
        self.store
            .record_log(entity_id, level, message, context, stack_trace)
    }

    pub fn record_event(
        &self,
        entity_id: &str,
        event_type: &str,
        description: &str,
        severity: &str,
        data: Metadata,
    ) -> PipelineResult<Event> {
        self.store
            .record_event(entity_id, event_type, description, severity, data)
    }

    pub fn create_snapshot(
        &self,
        entity_id: &str,
        fields: SnapshotFields,
    ) -> PipelineResult<Snapshot> {
        self.store.create_snapshot(entity_id, fields)
    }

    // Rules

    pub fn add_rule(&self, rule: AlertRule) -> PipelineResult<()> {
        self.engine.add_rule(rule)
    }

    pub fn remove_rule(&self, rule_id: &str) -> PipelineResult<AlertRule> {
        self.engine.remove_rule(rule_id)
    }

    pub fn update_rule(&self, rule_id: &str, patch: RulePatch) -> PipelineResult<AlertRule> {
        self.engine.update_rule(rule_id, patch)
    }

    pub fn list_rules(&self) -> Vec<AlertRule> {
        self.engine.list_rules()
    }

    pub fn rule_stats(&self) -> RuleStats {
        self.engine.stats()
    }

    // Alert lifecycle

    pub fn acknowledge(&self, alert_id: AlertId, actor: &str) -> PipelineResult<Alert> {
        self.alerts.acknowledge(alert_id, actor, self.store.now())
    }

    pub fn resolve(&self, alert_id: AlertId) -> PipelineResult<Alert> {
        self.alerts.resolve(alert_id, self.store.now())
    }

    // Manual triggers

    fn evaluator(&self) -> PipelineResult<EvaluatorHandle> {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.evaluator.clone())
            .ok_or(PipelineError::NotRunning("evaluator"))
    }

    fn dispatcher(&self) -> PipelineResult<DispatchHandle> {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.dispatcher.clone())
            .ok_or(PipelineError::NotRunning("dispatcher"))
    }

    fn retention(&self) -> PipelineResult<RetentionHandle> {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.retention.clone())
            .ok_or(PipelineError::NotRunning("retention"))
    }

    fn sync(&self) -> PipelineResult<SyncHandle> {
        self.running
            .lock()
            .as_ref()
            .and_then(|running| running.sync.clone())
            .ok_or(PipelineError::NotRunning("sync"))
    }

    /// Evaluate every known entity now and queue any new alerts
    pub async fn evaluate_now(&self) -> PipelineResult<EvaluationReport> {
        self.evaluator()?.evaluate_now().await
    }

    /// Deliver every queued alert now; returns how many were dispatched
    pub async fn dispatch_now(&self) -> PipelineResult<usize> {
        self.dispatcher()?.dispatch_now().await
    }

    pub async fn flush_now(&self) -> PipelineResult<FlushReport> {
        self.sync()?.flush().await
    }

    /// Run the durable retention cleanup now
    pub async fn cleanup_now(&self) -> PipelineResult<CleanupReport> {
        self.sync()?.cleanup().await
    }

    /// Trim in-memory samples and resolved alerts now
    pub async fn prune_now(&self) -> PipelineResult<RetentionReport> {
        self.retention()?.prune_now().await
    }

    // Statistics

    pub fn ingest_stats(&self) -> IngestStats {
        self.store.stats()
    }

    pub async fn dispatch_stats(&self) -> PipelineResult<DispatchStats> {
        self.dispatcher()?.get_stats().await
    }

    pub async fn sync_stats(&self) -> PipelineResult<SyncStats> {
        self.sync()?.get_stats().await
    }

    pub async fn backend_health(&self) -> PipelineResult<HealthStatus> {
        match &self.backend {
            Some(backend) => Ok(backend.health_check().await?),
            None => Ok(HealthStatus {
                healthy: true,
                message: "no durable store configured".to_string(),
                metadata: Default::default(),
            }),
        }
    }

    /// Human-readable backend statistics, `None` without a durable store
    pub async fn backend_stats(&self) -> PipelineResult<Option<String>> {
        match &self.backend {
            Some(backend) => Ok(Some(backend.get_stats().await?)),
            None => Ok(None),
        }
    }

    /// Logs [`backend_stats`](Self::backend_stats); a failed read only warns
    pub async fn log_backend_stats(&self) {
        match self.backend_stats().await {
            Ok(Some(status)) => info!("{}", status),
            Ok(None) => {}
            Err(e) => warn!("could not read backend stats: {}", e),
        }
    }
}
