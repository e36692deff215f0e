//! Real-time per-entity statistics
//!
//! Running `{current, min, max, avg, count}` per `(entity, kind)` plus the
//! newest sample time per entity. All of it is derived state: it can be thrown
//! away and rebuilt from the buffers with [`Aggregator::rebuild`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use crate::samples::{Metric, MetricKind};

/// Buffer key for metric samples
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub entity_id: String,
    pub kind: MetricKind,
}

impl MetricKey {
    pub fn new(entity_id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub current: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: u64,
    pub updated_at: DateTime<Utc>,
}

impl RunningStats {
    pub fn first(value: f64, at: DateTime<Utc>) -> Self {
        Self {
            current: value,
            min: value,
            max: value,
            avg: value,
            count: 1,
            updated_at: at,
        }
    }

    /// Fold one more observation in; `avg' = (avg * (n - 1) + value) / n`
    pub fn observe(&mut self, value: f64, at: DateTime<Utc>) {
        self.count += 1;
        let n = self.count as f64;
        self.avg = (self.avg * (n - 1.0) + value) / n;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        // a late sample still counts but never replaces a newer reading
        if at >= self.updated_at {
            self.current = value;
            self.updated_at = at;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Active,
    Inactive,
}

/// Statistics of one entity, keyed by metric kind
pub type EntityStats = BTreeMap<MetricKind, RunningStats>;

#[derive(Debug, Default)]
pub struct Aggregator {
    stats: DashMap<MetricKey, RunningStats>,
    last_seen: DashMap<String, DateTime<Utc>>,
    /// Entities with metric updates not yet seen by the evaluator
    pending: DashSet<String>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, metric: &Metric) {
        let key = MetricKey::new(metric.entity_id.clone(), metric.kind);
        self.stats
            .entry(key)
            .and_modify(|stats| stats.observe(metric.value, metric.timestamp))
            .or_insert_with(|| RunningStats::first(metric.value, metric.timestamp));

        self.touch(&metric.entity_id, metric.timestamp);
        self.pending.insert(metric.entity_id.clone());
    }

    /// Record that an entity produced any kind of sample at `at`
    pub fn touch(&self, entity_id: &str, at: DateTime<Utc>) {
        if let Some(mut seen) = self.last_seen.get_mut(entity_id) {
            if at > *seen {
                *seen = at;
            }
            return;
        }
        self.last_seen
            .entry(entity_id.to_string())
            .and_modify(|seen| {
                if at > *seen {
                    *seen = at;
                }
            })
            .or_insert(at);
    }

    pub fn last_seen(&self, entity_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(entity_id).map(|seen| *seen)
    }

    /// `Active` while the newest sample is younger than `staleness`
    pub fn status(&self, entity_id: &str, now: DateTime<Utc>, staleness: TimeDelta) -> EntityStatus {
        match self.last_seen(entity_id) {
            Some(seen) if now - seen < staleness => EntityStatus::Active,
            _ => EntityStatus::Inactive,
        }
    }

    pub fn stats(&self, entity_id: &str, kind: MetricKind) -> Option<RunningStats> {
        self.stats
            .get(&MetricKey::new(entity_id, kind))
            .map(|stats| *stats)
    }

    pub fn entity_stats(&self, entity_id: &str) -> EntityStats {
        MetricKind::ALL
            .iter()
            .filter_map(|kind| self.stats(entity_id, *kind).map(|stats| (*kind, stats)))
            .collect()
    }

    /// Most recent value per metric kind, as read by the rule engine
    pub fn latest_values(&self, entity_id: &str) -> HashMap<MetricKind, f64> {
        MetricKind::ALL
            .iter()
            .filter_map(|kind| self.stats(entity_id, *kind).map(|stats| (*kind, stats.current)))
            .collect()
    }

    /// Every entity that has produced at least one sample
    pub fn entities(&self) -> Vec<String> {
        let mut entities: Vec<String> = self.last_seen.iter().map(|e| e.key().clone()).collect();
        entities.sort();
        entities
    }

    /// Drain the set of entities whose metrics changed since the last call
    pub fn take_pending(&self) -> Vec<String> {
        let mut entities: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for entity in &entities {
            self.pending.remove(entity);
        }
        entities.sort();
        entities
    }

    /// Forget entities whose newest sample is older than `cutoff`, returning them
    pub fn forget_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let stale: Vec<String> = self
            .last_seen
            .iter()
            .filter(|entry| *entry.value() < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        let mut forgotten = Vec::with_capacity(stale.len());
        for entity_id in stale {
            // a sample may have arrived since the scan
            if self.last_seen.remove_if(&entity_id, |_, seen| *seen < cutoff).is_none() {
                continue;
            }
            for kind in MetricKind::ALL {
                self.stats
                    .remove_if(&MetricKey::new(entity_id.as_str(), kind), |_, stats| stats.updated_at < cutoff);
            }
            self.pending.remove(&entity_id);
            forgotten.push(entity_id);
        }
        forgotten.sort();
        forgotten
    }

    /// Reset and refold from metric history, oldest first
    pub fn rebuild<'a>(&self, metrics: impl IntoIterator<Item = &'a Metric>) {
        self.stats.clear();
        self.pending.clear();
        let mut metrics: Vec<&Metric> = metrics.into_iter().collect();
        metrics.sort_by_key(|metric| metric.timestamp);
        for metric in metrics {
            self.observe(metric);
        }
    }
}
