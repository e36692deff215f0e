//! Read side of the pipeline
//!
//! Queries are answered from memory whenever the buffers still cover the
//! requested window. When a buffer has already dropped samples inside the
//! window (or the key is not in memory at all) the older part is read from
//! the durable backend and stitched in front of the in-memory samples.
//!
//! Queries never fail: a durable read error is logged and the in-memory part
//! is returned on its own.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::aggregator::{EntityStats, EntityStatus, MetricKey};
use crate::alerts::{Alert, AlertStore};
use crate::buffer::Window;
use crate::samples::{Event, LogEntry, LogLevel, Metric, MetricKind, Sample, Snapshot};
use crate::storage::{QueryRange, StorageBackend, StorageResult};
use crate::store::TelemetryStore;
use crate::util::hours;

/// How many error logs a summary lists
const RECENT_ERRORS: usize = 10;

/// Samples of one entity currently held in memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCounts {
    pub metrics: usize,
    pub logs: usize,
    pub events: usize,
    pub snapshots: usize,
}

/// Point-in-time overview of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub entity_id: String,
    pub label: String,
    pub status: EntityStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub metrics: EntityStats,
    pub counts: SampleCounts,
    /// Error and critical logs over the last 24 hours
    pub errors_24h: usize,
    /// Most recent error logs, oldest first
    pub recent_errors: Vec<LogEntry>,
    pub latest_snapshot: Option<Snapshot>,
    /// Latest snapshot is older than twice the snapshot interval
    pub snapshot_overdue: bool,
    pub active_alerts: Vec<Alert>,
}

/// Live aggregates of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealTimeStats {
    pub entity_id: String,
    pub status: EntityStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub metrics: EntityStats,
}

pub struct QueryFacade {
    store: Arc<TelemetryStore>,
    alerts: Arc<AlertStore>,
    backend: Option<Arc<dyn StorageBackend>>,
    staleness: TimeDelta,
    snapshot_interval: TimeDelta,
}

impl QueryFacade {
    pub fn new(
        store: Arc<TelemetryStore>,
        alerts: Arc<AlertStore>,
        backend: Option<Arc<dyn StorageBackend>>,
        staleness: TimeDelta,
        snapshot_interval: TimeDelta,
    ) -> Self {
        Self {
            store,
            alerts,
            backend,
            staleness,
            snapshot_interval,
        }
    }

    fn window(&self, window_hours: u32) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = self.store.now();
        (now - hours(window_hours), now)
    }

    /// Backend to consult when memory does not cover `since`
    fn fallback<T>(&self, window: &Option<Window<T>>, since: DateTime<Utc>) -> Option<&Arc<dyn StorageBackend>> {
        let needed = match window {
            None => true,
            Some(window) => window.truncated_at.is_some_and(|truncated| truncated >= since),
        };
        self.backend.as_ref().filter(|_| needed)
    }

    pub fn summary(&self, entity_id: &str) -> EntitySummary {
        let now = self.store.now();
        let aggregator = self.store.aggregator();
        let key = entity_id.to_string();

        let metric_count = MetricKind::ALL
            .iter()
            .map(|kind| self.store.metrics.len_of(&MetricKey::new(entity_id, *kind)))
            .sum();

        let errors: Vec<LogEntry> = self
            .store
            .logs
            .query(&key, now - TimeDelta::hours(24))
            .map(|window| window.samples)
            .unwrap_or_default()
            .into_iter()
            .filter(|log| log.level.is_error())
            .collect();
        let recent_errors = errors[errors.len().saturating_sub(RECENT_ERRORS)..].to_vec();

        let latest_snapshot = self.store.snapshots.latest(&key);
        let snapshot_overdue = latest_snapshot
            .as_ref()
            .is_some_and(|snapshot| now - snapshot.timestamp > self.snapshot_interval * 2);

        EntitySummary {
            entity_id: entity_id.to_string(),
            label: self.store.label(entity_id),
            status: aggregator.status(entity_id, now, self.staleness),
            last_seen: aggregator.last_seen(entity_id),
            metrics: aggregator.entity_stats(entity_id),
            counts: SampleCounts {
                metrics: metric_count,
                logs: self.store.logs.len_of(&key),
                events: self.store.events.len_of(&key),
                snapshots: self.store.snapshots.len_of(&key),
            },
            errors_24h: errors.len(),
            recent_errors,
            latest_snapshot,
            snapshot_overdue,
            active_alerts: self.alerts.active_for(entity_id),
        }
    }

    /// Metrics of one entity over the last `window_hours`, oldest first
    #[instrument(skip(self))]
    pub async fn metrics(
        &self,
        entity_id: &str,
        kind: Option<MetricKind>,
        window_hours: u32,
    ) -> Vec<Metric> {
        let (since, now) = self.window(window_hours);
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => MetricKind::ALL.to_vec(),
        };

        let mut metrics = Vec::new();
        for kind in kinds {
            let window = self
                .store
                .metrics
                .query(&MetricKey::new(entity_id, kind), since);
            let samples = match self.fallback(&window, since) {
                Some(backend) => {
                    let durable = backend
                        .query_metrics(QueryRange::new(entity_id, since, now), Some(kind))
                        .await;
                    merge(window, durable, "metrics")
                }
                None => memory_only(window),
            };
            metrics.extend(samples);
        }

        metrics.sort_by_key(|metric| metric.timestamp);
        metrics
    }

    /// Logs of one entity over the last `window_hours`, optionally of one level
    #[instrument(skip(self))]
    pub async fn logs(
        &self,
        entity_id: &str,
        level: Option<LogLevel>,
        window_hours: u32,
    ) -> Vec<LogEntry> {
        let (since, now) = self.window(window_hours);
        let window = self.store.logs.query(&entity_id.to_string(), since);

        let mut logs = match self.fallback(&window, since) {
            Some(backend) => {
                let durable = backend
                    .query_logs(QueryRange::new(entity_id, since, now), level)
                    .await;
                merge(window, durable, "logs")
            }
            None => memory_only(window),
        };

        if let Some(level) = level {
            logs.retain(|log| log.level == level);
        }
        logs
    }

    /// Events of one entity over the last `window_hours`, optionally of one type
    #[instrument(skip(self))]
    pub async fn events(
        &self,
        entity_id: &str,
        event_type: Option<&str>,
        window_hours: u32,
    ) -> Vec<Event> {
        let (since, now) = self.window(window_hours);
        let window = self.store.events.query(&entity_id.to_string(), since);

        let mut events = match self.fallback(&window, since) {
            Some(backend) => {
                let durable = backend
                    .query_events(QueryRange::new(entity_id, since, now), event_type)
                    .await;
                merge(window, durable, "events")
            }
            None => memory_only(window),
        };

        if let Some(event_type) = event_type {
            events.retain(|event| event.event_type == event_type);
        }
        events
    }

    #[instrument(skip(self))]
    pub async fn snapshots(&self, entity_id: &str, window_hours: u32) -> Vec<Snapshot> {
        let (since, now) = self.window(window_hours);
        let window = self.store.snapshots.query(&entity_id.to_string(), since);

        match self.fallback(&window, since) {
            Some(backend) => {
                let durable = backend
                    .query_snapshots(QueryRange::new(entity_id, since, now))
                    .await;
                merge(window, durable, "snapshots")
            }
            None => memory_only(window),
        }
    }

    /// Live aggregates for one entity, or for every known entity
    pub fn real_time_stats(&self, entity_id: Option<&str>) -> Vec<RealTimeStats> {
        let now = self.store.now();
        let aggregator = self.store.aggregator();
        let entities = match entity_id {
            Some(entity_id) => vec![entity_id.to_string()],
            None => self.store.entities(),
        };

        entities
            .into_iter()
            .map(|entity_id| RealTimeStats {
                status: aggregator.status(&entity_id, now, self.staleness),
                last_seen: aggregator.last_seen(&entity_id),
                metrics: aggregator.entity_stats(&entity_id),
                entity_id,
            })
            .collect()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.active()
    }

    /// Alerts created within the last `window_hours`, newest first
    pub fn alert_history(&self, window_hours: u32) -> Vec<Alert> {
        let (since, _) = self.window(window_hours);
        self.alerts.history(since)
    }

    /// Active alert counts per entity
    pub fn active_alert_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for alert in self.alerts.active() {
            *counts.entry(alert.entity_id).or_insert(0) += 1;
        }
        counts
    }
}

fn memory_only<T>(window: Option<Window<T>>) -> Vec<T> {
    window.map(|window| window.samples).unwrap_or_default()
}

/// Durable rows older than anything in memory, followed by the in-memory samples
fn merge<T: Sample>(window: Option<Window<T>>, durable: StorageResult<Vec<T>>, what: &str) -> Vec<T> {
    let memory = memory_only(window);
    let durable = match durable {
        Ok(rows) => rows,
        Err(e) => {
            warn!("durable {} query failed, answering from memory only: {}", what, e);
            return memory;
        }
    };

    let Some(oldest) = memory.first().map(|sample| sample.timestamp()) else {
        return durable;
    };

    // Rows at the boundary instant may be evicted samples or copies of the
    // ones still in memory; each memory sample cancels one equal row.
    let mut boundary: Vec<&T> = memory
        .iter()
        .take_while(|sample| sample.timestamp() == oldest)
        .collect();
    let mut merged: Vec<T> = durable
        .into_iter()
        .filter(|row| match row.timestamp().cmp(&oldest) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => match boundary.iter().position(|sample| *sample == row) {
                Some(index) => {
                    boundary.swap_remove(index);
                    false
                }
                None => true,
            },
        })
        .collect();
    merged.extend(memory);
    merged
}
