//! Storage backend trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::CleanupReport;
use crate::samples::{Event, LogEntry, LogLevel, Metric, MetricKind, Snapshot};

/// Query parameters for fetching samples of one entity within a time range
#[derive(Debug, Clone)]
pub struct QueryRange {
    pub entity_id: String,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (inclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

impl QueryRange {
    pub fn new(entity_id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            start,
            end,
            limit: None,
        }
    }
}

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Durable, append-only store for samples
///
/// Writes are batch-oriented and at-least-once: the sync loop may hand the
/// same sample over twice after a failed flush, so implementations must
/// tolerate duplicates. All range queries return rows oldest first.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append metrics; a row that already exists for (entity, kind, timestamp) is skipped.
    /// Returns the number of rows actually written.
    async fn insert_metrics(&self, metrics: Vec<Metric>) -> StorageResult<u64>;

    async fn insert_logs(&self, logs: Vec<LogEntry>) -> StorageResult<u64>;

    async fn insert_events(&self, events: Vec<Event>) -> StorageResult<u64>;

    async fn insert_snapshots(&self, snapshots: Vec<Snapshot>) -> StorageResult<u64>;

    async fn query_metrics(
        &self,
        query: QueryRange,
        kind: Option<MetricKind>,
    ) -> StorageResult<Vec<Metric>>;

    async fn query_logs(&self, query: QueryRange, level: Option<LogLevel>)
    -> StorageResult<Vec<LogEntry>>;

    async fn query_events(
        &self,
        query: QueryRange,
        event_type: Option<&str>,
    ) -> StorageResult<Vec<Event>>;

    async fn query_snapshots(&self, query: QueryRange) -> StorageResult<Vec<Snapshot>>;

    /// Metrics of every entity at or after `since`, used to warm the buffers
    async fn query_recent_metrics(&self, since: DateTime<Utc>) -> StorageResult<Vec<Metric>>;

    /// Delete rows older than `before` from every table
    ///
    /// Used for retention policy enforcement.
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<CleanupReport>;

    /// Lightweight check that the backend is operational
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Human-readable stats about the backend
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
