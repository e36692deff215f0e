//! Ingestion side of the pipeline
//!
//! [`TelemetryStore`] owns the four ring-buffer stores and the aggregator.
//! Every `record_*` call is synchronous and only touches memory: it validates
//! the sample, appends it under the key's own lock and updates the aggregator.
//! Nothing on this path waits for disk or network.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::aggregator::{Aggregator, MetricKey};
use crate::buffer::RingStore;
use crate::clock::Clock;
use crate::config::BufferConfig;
use crate::error::PipelineResult;
use crate::samples::{
    Event, LogEntry, LogLevel, Metadata, Metric, MetricKind, Sample, Snapshot, SnapshotFields,
};

/// Counters describing the ingestion path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    pub accepted: u64,
    pub rejected: u64,
    pub buffered_metrics: usize,
    pub buffered_logs: usize,
    pub buffered_events: usize,
    pub buffered_snapshots: usize,
    /// Samples evicted from memory before they were flushed
    pub lost_unsynced: u64,
}

/// Samples removed by a memory prune
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneCounts {
    pub metrics: usize,
    pub logs: usize,
    pub events: usize,
    pub snapshots: usize,
    /// Entities with no sample left in the window, dropped from the aggregator
    pub entities: usize,
}

impl PruneCounts {
    /// Samples removed, not counting `entities`
    pub fn total(&self) -> usize {
        self.metrics + self.logs + self.events + self.snapshots
    }
}

#[derive(Debug)]
pub struct TelemetryStore {
    clock: Arc<dyn Clock>,
    pub(crate) metrics: RingStore<MetricKey, Metric>,
    pub(crate) logs: RingStore<String, LogEntry>,
    pub(crate) events: RingStore<String, Event>,
    pub(crate) snapshots: RingStore<String, Snapshot>,
    aggregator: Aggregator,
    labels: DashMap<String, String>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl TelemetryStore {
    pub fn new(buffers: &BufferConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            metrics: RingStore::new(buffers.metrics),
            logs: RingStore::new(buffers.logs),
            events: RingStore::new(buffers.events),
            snapshots: RingStore::new(buffers.snapshots),
            aggregator: Aggregator::new(),
            labels: DashMap::new(),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    fn accept<T>(&self, result: PipelineResult<T>, what: &str) -> PipelineResult<T> {
        match result {
            Ok(sample) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(sample)
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("rejected {}: {}", what, e);
                Err(e)
            }
        }
    }

    /// Record a metric value stamped with the current time
    pub fn record_metric(
        &self,
        entity_id: &str,
        kind: MetricKind,
        value: f64,
        metadata: Metadata,
    ) -> PipelineResult<Metric> {
        let metric = self.accept(
            Metric::new(entity_id, kind, value, self.now(), metadata),
            "metric",
        )?;
        self.push_metric(metric.clone());
        Ok(metric)
    }

    /// Like [`record_metric`](Self::record_metric) with the kind given by name or alias
    pub fn record_named_metric(
        &self,
        entity_id: &str,
        kind: &str,
        value: f64,
        metadata: Metadata,
    ) -> PipelineResult<Metric> {
        let kind = self.accept_kind(kind)?;
        self.record_metric(entity_id, kind, value, metadata)
    }

    fn accept_kind(&self, kind: &str) -> PipelineResult<MetricKind> {
        kind.parse::<MetricKind>().inspect_err(|e| {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!("rejected metric: {}", e);
        })
    }

    /// Record a metric that already carries its own timestamp
    pub fn ingest_metric(&self, metric: Metric) -> PipelineResult<()> {
        let metric = self.accept(
            Metric::new(
                metric.entity_id,
                metric.kind,
                metric.value,
                metric.timestamp,
                metric.metadata,
            ),
            "metric",
        )?;
        self.push_metric(metric);
        Ok(())
    }

    fn push_metric(&self, metric: Metric) {
        trace!(
            entity_id = %metric.entity_id,
            kind = %metric.kind,
            value = metric.value,
            "recording metric"
        );
        self.aggregator.observe(&metric);
        let key = MetricKey::new(metric.entity_id.clone(), metric.kind);
        self.metrics.record(key, metric);
    }

    /// Record a log line; error and critical lines also record a `log_error` event
    pub fn record_log(
        &self,
        entity_id: &str,
        level: LogLevel,
        message: &str,
        context: Metadata,
        stack_trace: Option<String>,
    ) -> PipelineResult<LogEntry> {
        let log = self.accept(
            LogEntry::new(entity_id, level, message, self.now(), context, stack_trace),
            "log entry",
        )?;
        trace!(entity_id = %log.entity_id, level = %log.level, "recording log entry");

        if log.level.is_error() {
            self.push_event(log.escalation_event());
        }
        self.aggregator.touch(&log.entity_id, log.timestamp);
        self.logs.record(log.entity_id.clone(), log.clone());
        Ok(log)
    }

    pub fn record_event(
        &self,
        entity_id: &str,
        event_type: &str,
        description: &str,
        severity: &str,
        data: Metadata,
    ) -> PipelineResult<Event> {
        let event = self.accept(
            Event::new(entity_id, event_type, description, severity, self.now(), data),
            "event",
        )?;
        self.push_event(event.clone());
        Ok(event)
    }

    fn push_event(&self, event: Event) {
        trace!(entity_id = %event.entity_id, event_type = %event.event_type, "recording event");
        self.aggregator.touch(&event.entity_id, event.timestamp);
        self.events.record(event.entity_id.clone(), event);
    }

    pub fn create_snapshot(
        &self,
        entity_id: &str,
        fields: SnapshotFields,
    ) -> PipelineResult<Snapshot> {
        let snapshot = self.accept(Snapshot::new(entity_id, self.now(), fields), "snapshot")?;
        trace!(entity_id = %snapshot.entity_id, "recording snapshot");
        self.aggregator.touch(&snapshot.entity_id, snapshot.timestamp);
        self.snapshots
            .record(snapshot.entity_id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    pub fn register_entity(&self, entity_id: &str, label: &str) {
        self.labels.insert(entity_id.to_string(), label.to_string());
    }

    /// Display label of an entity, defaulting to its id
    pub fn label(&self, entity_id: &str) -> String {
        self.labels
            .get(entity_id)
            .map(|label| label.clone())
            .unwrap_or_else(|| entity_id.to_string())
    }

    /// Every entity known either by registration or by its samples
    pub fn entities(&self) -> Vec<String> {
        let mut entities = self.aggregator.entities();
        for entry in self.labels.iter() {
            if !entities.contains(entry.key()) {
                entities.push(entry.key().clone());
            }
        }
        entities.sort();
        entities
    }

    /// Seed the metric buffers with already-durable history and rebuild stats
    pub fn restore_metrics(&self, history: Vec<Metric>) -> usize {
        let restored = history.len();
        let mut by_key: BTreeMap<MetricKey, Vec<Metric>> = BTreeMap::new();
        for metric in history {
            by_key
                .entry(MetricKey::new(metric.entity_id.clone(), metric.kind))
                .or_default()
                .push(metric);
        }

        let mut all = Vec::with_capacity(restored);
        for (key, mut samples) in by_key {
            samples.sort_by_key(|metric| metric.timestamp);
            all.extend(samples.iter().cloned());
            self.metrics.restore(key, samples);
        }

        self.aggregator.rebuild(all.iter());
        for metric in &all {
            self.aggregator.touch(metric.entity_id(), metric.timestamp());
        }
        // history was already evaluated by the previous run
        self.aggregator.take_pending();
        restored
    }

    /// Whether any buffer holds samples not yet confirmed durable
    pub fn has_unsynced(&self) -> bool {
        self.metrics.has_unsynced()
            || self.logs.has_unsynced()
            || self.events.has_unsynced()
            || self.snapshots.has_unsynced()
    }

    /// Drop every in-memory sample older than `cutoff`
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> PruneCounts {
        let counts = PruneCounts {
            metrics: self.metrics.prune_before(cutoff),
            logs: self.logs.prune_before(cutoff),
            events: self.events.prune_before(cutoff),
            snapshots: self.snapshots.prune_before(cutoff),
            entities: self.aggregator.forget_before(cutoff).len(),
        };
        if counts.entities > 0 {
            trace!("forgot {} quiet entities", counts.entities);
        }
        counts
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            buffered_metrics: self.metrics.total_len(),
            buffered_logs: self.logs.total_len(),
            buffered_events: self.events.total_len(),
            buffered_snapshots: self.snapshots.total_len(),
            lost_unsynced: self.metrics.lost_unsynced()
                + self.logs.lost_unsynced()
                + self.events.lost_unsynced()
                + self.snapshots.lost_unsynced(),
        }
    }
}
