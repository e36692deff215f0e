//! In-memory backend for unit tests

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::backend::{HealthStatus, QueryRange, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::CleanupReport;
use crate::samples::{Event, LogEntry, LogLevel, Metric, MetricKind, Sample, Snapshot};

/// Keeps every written row in memory; reads and writes can be made to fail
#[derive(Debug, Default)]
pub struct MemoryBackend {
    pub metrics: Mutex<Vec<Metric>>,
    pub logs: Mutex<Vec<LogEntry>>,
    pub events: Mutex<Vec<Event>>,
    pub snapshots: Mutex<Vec<Snapshot>>,
    pub cleanups: Mutex<Vec<DateTime<Utc>>>,
    pub fail_writes: AtomicBool,
    pub fail_reads: AtomicBool,
    pub closed: AtomicBool,
}

impl MemoryBackend {
    fn check(flag: &AtomicBool) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed("disk unavailable".to_string()));
        }
        Ok(())
    }

    fn in_range<T: Sample>(rows: &[T], query: &QueryRange, keep: impl Fn(&T) -> bool) -> Vec<T> {
        let mut matched: Vec<T> = rows
            .iter()
            .filter(|row| row.entity_id() == query.entity_id)
            .filter(|row| row.timestamp() >= query.start && row.timestamp() <= query.end)
            .filter(|row| keep(row))
            .cloned()
            .collect();
        matched.sort_by_key(|row| row.timestamp());
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        matched
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_metrics(&self, metrics: Vec<Metric>) -> StorageResult<u64> {
        Self::check(&self.fail_writes)?;
        let count = metrics.len() as u64;
        self.metrics.lock().extend(metrics);
        Ok(count)
    }

    async fn insert_logs(&self, logs: Vec<LogEntry>) -> StorageResult<u64> {
        Self::check(&self.fail_writes)?;
        let count = logs.len() as u64;
        self.logs.lock().extend(logs);
        Ok(count)
    }

    async fn insert_events(&self, events: Vec<Event>) -> StorageResult<u64> {
        Self::check(&self.fail_writes)?;
        let count = events.len() as u64;
        self.events.lock().extend(events);
        Ok(count)
    }

    async fn insert_snapshots(&self, snapshots: Vec<Snapshot>) -> StorageResult<u64> {
        Self::check(&self.fail_writes)?;
        let count = snapshots.len() as u64;
        self.snapshots.lock().extend(snapshots);
        Ok(count)
    }

    async fn query_metrics(
        &self,
        query: QueryRange,
        kind: Option<MetricKind>,
    ) -> StorageResult<Vec<Metric>> {
        Self::check(&self.fail_reads)?;
        Ok(Self::in_range(&self.metrics.lock(), &query, |m| {
            kind.is_none_or(|kind| m.kind == kind)
        }))
    }

    async fn query_logs(
        &self,
        query: QueryRange,
        level: Option<LogLevel>,
    ) -> StorageResult<Vec<LogEntry>> {
        Self::check(&self.fail_reads)?;
        Ok(Self::in_range(&self.logs.lock(), &query, |l| {
            level.is_none_or(|level| l.level == level)
        }))
    }

    async fn query_events(
        &self,
        query: QueryRange,
        event_type: Option<&str>,
    ) -> StorageResult<Vec<Event>> {
        Self::check(&self.fail_reads)?;
        Ok(Self::in_range(&self.events.lock(), &query, |e| {
            event_type.is_none_or(|t| e.event_type == t)
        }))
    }

    async fn query_snapshots(&self, query: QueryRange) -> StorageResult<Vec<Snapshot>> {
        Self::check(&self.fail_reads)?;
        Ok(Self::in_range(&self.snapshots.lock(), &query, |_| true))
    }

    async fn query_recent_metrics(&self, since: DateTime<Utc>) -> StorageResult<Vec<Metric>> {
        Self::check(&self.fail_reads)?;
        let mut recent: Vec<Metric> = self
            .metrics
            .lock()
            .iter()
            .filter(|m| m.timestamp >= since)
            .cloned()
            .collect();
        recent.sort_by_key(|m| m.timestamp);
        Ok(recent)
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<CleanupReport> {
        self.cleanups.lock().push(before);
        let mut report = CleanupReport::default();

        let mut metrics = self.metrics.lock();
        let count = metrics.len();
        metrics.retain(|m| m.timestamp >= before);
        report.metrics = (count - metrics.len()) as u64;

        let mut logs = self.logs.lock();
        let count = logs.len();
        logs.retain(|l| l.timestamp >= before);
        report.logs = (count - logs.len()) as u64;

        Ok(report)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: !self.fail_reads.load(Ordering::SeqCst),
            message: "memory backend".to_string(),
            metadata: Default::default(),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        Self::check(&self.fail_reads)?;
        Ok(format!("memory: {} metrics", self.metrics.lock().len()))
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
