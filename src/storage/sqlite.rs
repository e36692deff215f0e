//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers (query fallback) don't block the sync actor's writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Limitations
//!
//! - **Concurrency**: One writer at a time; batches are serialized by the sync actor anyway
//! - **Replication**: No built-in replication (file-level backups only)

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, QueryRange, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{CleanupReport, Table, decode_json, encode_json, from_micros, to_micros};
use crate::samples::{Event, LogEntry, LogLevel, Metric, MetricKind, Snapshot, SnapshotFields};

/// SQLite storage backend
///
/// Stores every sample type in a local SQLite database file.
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for WAL mode with a busy timeout
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use plugin_telemetry::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./telemetry.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("SQLite backend ready");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    async fn count_rows(&self, table: Table) -> StorageResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let row: (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(row.0)
    }
}

fn limit_of(query: &QueryRange) -> i64 {
    // SQLite treats a negative LIMIT as "no limit"
    query.limit.map(|l| l as i64).unwrap_or(-1)
}

fn decode_err(column: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::SerializationError(format!("invalid {}: {}", column, err))
}

fn metric_from_row(row: &SqliteRow) -> StorageResult<Metric> {
    let kind: String = row.try_get("kind")?;
    let metadata: String = row.try_get("metadata")?;

    Ok(Metric {
        entity_id: row.try_get("entity_id")?,
        kind: kind.parse::<MetricKind>().map_err(|e| decode_err("kind", e))?,
        value: row.try_get("value")?,
        timestamp: from_micros(row.try_get("timestamp")?)?,
        metadata: decode_json("metadata", &metadata)?,
    })
}

fn log_from_row(row: &SqliteRow) -> StorageResult<LogEntry> {
    let level: String = row.try_get("level")?;
    let context: String = row.try_get("context")?;

    Ok(LogEntry {
        entity_id: row.try_get("entity_id")?,
        level: level.parse::<LogLevel>().map_err(|e| decode_err("level", e))?,
        message: row.try_get("message")?,
        timestamp: from_micros(row.try_get("timestamp")?)?,
        context: decode_json("context", &context)?,
        stack_trace: row.try_get("stack_trace")?,
    })
}

fn event_from_row(row: &SqliteRow) -> StorageResult<Event> {
    let data: String = row.try_get("data")?;

    Ok(Event {
        entity_id: row.try_get("entity_id")?,
        event_type: row.try_get("event_type")?,
        description: row.try_get("description")?,
        timestamp: from_micros(row.try_get("timestamp")?)?,
        severity: row.try_get("severity")?,
        data: decode_json("data", &data)?,
    })
}

fn snapshot_from_row(row: &SqliteRow) -> StorageResult<Snapshot> {
    let disk_io: String = row.try_get("disk_io")?;
    let network_io: String = row.try_get("network_io")?;
    let custom: String = row.try_get("custom")?;
    let request_count: i64 = row.try_get("request_count")?;

    Ok(Snapshot {
        entity_id: row.try_get("entity_id")?,
        timestamp: from_micros(row.try_get("timestamp")?)?,
        fields: SnapshotFields {
            cpu: row.try_get("cpu")?,
            memory: row.try_get("memory")?,
            latency: row.try_get("latency")?,
            error_rate: row.try_get("error_rate")?,
            request_count: request_count.max(0) as u64,
            throughput: row.try_get("throughput")?,
            disk_io: decode_json("disk_io", &disk_io)?,
            network_io: decode_json("network_io", &network_io)?,
            custom: decode_json("custom", &custom)?,
        },
    })
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, metrics), fields(count = metrics.len()))]
    async fn insert_metrics(&self, metrics: Vec<Metric>) -> StorageResult<u64> {
        if metrics.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for metric in &metrics {
            let result = sqlx::query(
                r#"
                INSERT INTO metrics (entity_id, kind, timestamp, value, metadata)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&metric.entity_id)
            .bind(metric.kind.as_str())
            .bind(to_micros(&metric.timestamp))
            .bind(metric.value)
            .bind(encode_json(&metric.metadata)?)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;

        debug!("wrote {} metrics", written);
        Ok(written)
    }

    #[instrument(skip(self, logs), fields(count = logs.len()))]
    async fn insert_logs(&self, logs: Vec<LogEntry>) -> StorageResult<u64> {
        if logs.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for log in &logs {
            let result = sqlx::query(
                r#"
                INSERT INTO logs (entity_id, timestamp, level, message, context, stack_trace)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&log.entity_id)
            .bind(to_micros(&log.timestamp))
            .bind(log.level.as_str())
            .bind(&log.message)
            .bind(encode_json(&log.context)?)
            .bind(&log.stack_trace)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn insert_events(&self, events: Vec<Event>) -> StorageResult<u64> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for event in &events {
            let result = sqlx::query(
                r#"
                INSERT INTO events (entity_id, timestamp, event_type, description, severity, data)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.entity_id)
            .bind(to_micros(&event.timestamp))
            .bind(&event.event_type)
            .bind(&event.description)
            .bind(&event.severity)
            .bind(encode_json(&event.data)?)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    #[instrument(skip(self, snapshots), fields(count = snapshots.len()))]
    async fn insert_snapshots(&self, snapshots: Vec<Snapshot>) -> StorageResult<u64> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for snapshot in &snapshots {
            let fields = &snapshot.fields;
            let result = sqlx::query(
                r#"
                INSERT INTO snapshots (
                    entity_id, timestamp, cpu, memory, latency, error_rate,
                    request_count, throughput, disk_io, network_io, custom
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&snapshot.entity_id)
            .bind(to_micros(&snapshot.timestamp))
            .bind(fields.cpu)
            .bind(fields.memory)
            .bind(fields.latency)
            .bind(fields.error_rate)
            .bind(fields.request_count.min(i64::MAX as u64) as i64)
            .bind(fields.throughput)
            .bind(encode_json(&fields.disk_io)?)
            .bind(encode_json(&fields.network_io)?)
            .bind(encode_json(&fields.custom)?)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    #[instrument(skip(self), fields(entity_id = %query.entity_id))]
    async fn query_metrics(
        &self,
        query: QueryRange,
        kind: Option<MetricKind>,
    ) -> StorageResult<Vec<Metric>> {
        let kind_clause = if kind.is_some() { "AND kind = ?" } else { "" };
        let sql = format!(
            r#"
            SELECT entity_id, kind, timestamp, value, metadata
            FROM metrics
            WHERE entity_id = ? AND timestamp >= ? AND timestamp <= ? {}
            ORDER BY timestamp ASC, id ASC
            LIMIT ?
            "#,
            kind_clause
        );

        let mut stmt = sqlx::query(&sql)
            .bind(&query.entity_id)
            .bind(to_micros(&query.start))
            .bind(to_micros(&query.end));
        if let Some(kind) = kind {
            stmt = stmt.bind(kind.as_str());
        }

        let rows = stmt.bind(limit_of(&query)).fetch_all(&self.pool).await?;
        let results = rows.iter().map(metric_from_row).collect::<StorageResult<Vec<_>>>()?;

        debug!("query returned {} metrics", results.len());
        Ok(results)
    }

    #[instrument(skip(self), fields(entity_id = %query.entity_id))]
    async fn query_logs(
        &self,
        query: QueryRange,
        level: Option<LogLevel>,
    ) -> StorageResult<Vec<LogEntry>> {
        let level_clause = if level.is_some() { "AND level = ?" } else { "" };
        let sql = format!(
            r#"
            SELECT entity_id, timestamp, level, message, context, stack_trace
            FROM logs
            WHERE entity_id = ? AND timestamp >= ? AND timestamp <= ? {}
            ORDER BY timestamp ASC, id ASC
            LIMIT ?
            "#,
            level_clause
        );

        let mut stmt = sqlx::query(&sql)
            .bind(&query.entity_id)
            .bind(to_micros(&query.start))
            .bind(to_micros(&query.end));
        if let Some(level) = level {
            stmt = stmt.bind(level.as_str());
        }

        let rows = stmt.bind(limit_of(&query)).fetch_all(&self.pool).await?;
        rows.iter().map(log_from_row).collect()
    }

    #[instrument(skip(self), fields(entity_id = %query.entity_id))]
    async fn query_events(
        &self,
        query: QueryRange,
        event_type: Option<&str>,
    ) -> StorageResult<Vec<Event>> {
        let type_clause = if event_type.is_some() {
            "AND event_type = ?"
        } else {
            ""
        };
        let sql = format!(
            r#"
            SELECT entity_id, timestamp, event_type, description, severity, data
            FROM events
            WHERE entity_id = ? AND timestamp >= ? AND timestamp <= ? {}
            ORDER BY timestamp ASC, id ASC
            LIMIT ?
            "#,
            type_clause
        );

        let mut stmt = sqlx::query(&sql)
            .bind(&query.entity_id)
            .bind(to_micros(&query.start))
            .bind(to_micros(&query.end));
        if let Some(event_type) = event_type {
            stmt = stmt.bind(event_type);
        }

        let rows = stmt.bind(limit_of(&query)).fetch_all(&self.pool).await?;
        rows.iter().map(event_from_row).collect()
    }

    #[instrument(skip(self), fields(entity_id = %query.entity_id))]
    async fn query_snapshots(&self, query: QueryRange) -> StorageResult<Vec<Snapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_id, timestamp, cpu, memory, latency, error_rate,
                   request_count, throughput, disk_io, network_io, custom
            FROM snapshots
            WHERE entity_id = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(&query.entity_id)
        .bind(to_micros(&query.start))
        .bind(to_micros(&query.end))
        .bind(limit_of(&query))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn query_recent_metrics(&self, since: DateTime<Utc>) -> StorageResult<Vec<Metric>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_id, kind, timestamp, value, metadata
            FROM metrics
            WHERE timestamp >= ?
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(to_micros(&since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(metric_from_row).collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<CleanupReport> {
        let before_micros = to_micros(&before);
        let mut report = CleanupReport::default();

        let mut tx = self.pool.begin().await?;
        for table in Table::ALL {
            let sql = format!("DELETE FROM {} WHERE timestamp < ?", table.name());
            let result = sqlx::query(&sql)
                .bind(before_micros)
                .execute(&mut *tx)
                .await?;
            report.add(table, result.rows_affected());
        }
        tx.commit().await?;

        info!("deleted {} rows older than {}", report.total(), before);
        Ok(report)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let mut counts = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            counts.push(format!("{} {}", self.count_rows(table).await?, table));
        }

        let range: (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT MIN(timestamp), MAX(timestamp) FROM metrics")
                .fetch_one(&self.pool)
                .await?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);
        let file_size_mb = file_size as f64 / 1_000_000.0;

        let time_range = match range {
            (Some(old), Some(new)) => format!(
                "{} to {}",
                from_micros(old)?.format("%Y-%m-%d"),
                from_micros(new)?.format("%Y-%m-%d")
            ),
            _ => "no data".to_string(),
        };

        Ok(format!(
            "SQLite: {} rows, {:.2} MB on disk, metric time range: {}",
            counts.join(", "),
            file_size_mb,
            time_range
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::Metadata;
    use chrono::{SubsecRound, TimeDelta};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn backend() -> (tempfile::TempDir, SqliteBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let backend = SqliteBackend::new(&db_path).await.unwrap();
        (temp_dir, backend)
    }

    fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }

    fn metric(entity: &str, kind: MetricKind, value: f64, at: DateTime<Utc>) -> Metric {
        let mut metadata = Metadata::new();
        metadata.insert("host".to_string(), json!("node-1"));
        Metric::new(entity, kind, value, at, metadata).unwrap()
    }

    fn range(entity: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> QueryRange {
        QueryRange::new(entity, start, end)
    }

    #[tokio::test]
    async fn test_sqlite_backend_creation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let backend = SqliteBackend::new(&db_path).await;
        assert!(backend.is_ok());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_insert_and_query_metrics() {
        let (_dir, backend) = backend().await;
        let base = now();

        let rows: Vec<Metric> = (0..10)
            .map(|i| metric("payments", MetricKind::Cpu, i as f64, base + TimeDelta::seconds(i * 60)))
            .collect();
        let written = backend.insert_metrics(rows.clone()).await.unwrap();
        assert_eq!(written, 10);

        let results = backend
            .query_metrics(
                range(
                    "payments",
                    base + TimeDelta::seconds(120),
                    base + TimeDelta::seconds(480),
                ),
                None,
            )
            .await
            .unwrap();

        // Minutes 2-8 inclusive
        assert_eq!(results.len(), 7);
        assert_eq!(results[0], rows[2]);
        assert_eq!(results[6], rows[8]);
    }

    #[tokio::test]
    async fn test_metrics_sharing_a_timestamp_are_all_kept() {
        let (_dir, backend) = backend().await;
        let at = now();
        let rows = vec![
            metric("payments", MetricKind::Cpu, 10.0, at),
            metric("payments", MetricKind::Cpu, 20.0, at),
        ];

        assert_eq!(backend.insert_metrics(rows[..1].to_vec()).await.unwrap(), 1);
        assert_eq!(backend.insert_metrics(rows[1..].to_vec()).await.unwrap(), 1);

        let results = backend
            .query_metrics(range("payments", at, at), Some(MetricKind::Cpu))
            .await
            .unwrap();
        assert_eq!(results, rows);
    }

    #[tokio::test]
    async fn test_metric_kind_filter_and_limit() {
        let (_dir, backend) = backend().await;
        let base = now();

        let mut rows = Vec::new();
        for i in 0..5 {
            let at = base + TimeDelta::seconds(i);
            rows.push(metric("search", MetricKind::Cpu, 10.0, at));
            rows.push(metric("search", MetricKind::Latency, 120.0, at));
        }
        backend.insert_metrics(rows).await.unwrap();

        let end = base + TimeDelta::seconds(10);
        let latency = backend
            .query_metrics(range("search", base, end), Some(MetricKind::Latency))
            .await
            .unwrap();
        assert_eq!(latency.len(), 5);
        assert!(latency.iter().all(|m| m.kind == MetricKind::Latency));

        let mut limited = range("search", base, end);
        limited.limit = Some(3);
        let results = backend.query_metrics(limited, None).await.unwrap();
        assert_eq!(results.len(), 3);

        let other = backend
            .query_metrics(range("payments", base, end), None)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_logs_round_trip_with_level_filter() {
        let (_dir, backend) = backend().await;
        let at = now();

        let mut context = Metadata::new();
        context.insert("request_id".to_string(), json!("abc-123"));
        let error = LogEntry::new(
            "payments",
            LogLevel::Error,
            "card declined",
            at,
            context,
            Some("at charge()".to_string()),
        )
        .unwrap();
        let info = LogEntry::new("payments", LogLevel::Info, "started", at, Metadata::new(), None)
            .unwrap();

        backend
            .insert_logs(vec![info.clone(), error.clone()])
            .await
            .unwrap();

        let all = backend
            .query_logs(range("payments", at, at), None)
            .await
            .unwrap();
        assert_eq!(all, vec![info, error.clone()]);

        let errors = backend
            .query_logs(range("payments", at, at), Some(LogLevel::Error))
            .await
            .unwrap();
        assert_eq!(errors, vec![error]);
    }

    #[tokio::test]
    async fn test_events_filter_by_type() {
        let (_dir, backend) = backend().await;
        let at = now();

        let deploy = Event::new("search", "deploy", "v2 rolled out", "info", at, Metadata::new())
            .unwrap();
        let restart = Event::new(
            "search",
            "restart",
            "worker restarted",
            "warning",
            at + TimeDelta::seconds(1),
            Metadata::new(),
        )
        .unwrap();
        backend
            .insert_events(vec![deploy.clone(), restart])
            .await
            .unwrap();

        let results = backend
            .query_events(range("search", at, at + TimeDelta::seconds(5)), Some("deploy"))
            .await
            .unwrap();
        assert_eq!(results, vec![deploy]);
    }

    #[tokio::test]
    async fn test_snapshots_round_trip() {
        let (_dir, backend) = backend().await;
        let at = now();

        let mut fields = SnapshotFields {
            cpu: 55.5,
            memory: 71.25,
            latency: 180.0,
            error_rate: 0.5,
            request_count: 12_000,
            throughput: 200.0,
            ..Default::default()
        };
        fields.disk_io.insert("read_bytes".to_string(), 4096.0);
        fields.network_io.insert("rx_bytes".to_string(), 1024.0);
        fields.custom.insert("queue_depth".to_string(), json!(12));
        let snapshot = Snapshot::new("payments", at, fields).unwrap();

        backend.insert_snapshots(vec![snapshot.clone()]).await.unwrap();

        let results = backend
            .query_snapshots(range("payments", at, at))
            .await
            .unwrap();
        assert_eq!(results, vec![snapshot]);
    }

    #[tokio::test]
    async fn test_query_recent_metrics_spans_entities() {
        let (_dir, backend) = backend().await;
        let now = now();

        backend
            .insert_metrics(vec![
                metric("payments", MetricKind::Cpu, 1.0, now - TimeDelta::hours(48)),
                metric("payments", MetricKind::Cpu, 2.0, now - TimeDelta::hours(1)),
                metric("search", MetricKind::Memory, 3.0, now),
            ])
            .await
            .unwrap();

        let recent = backend
            .query_recent_metrics(now - TimeDelta::hours(24))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].entity_id, "payments");
        assert_eq!(recent[1].entity_id, "search");
    }

    #[tokio::test]
    async fn test_cleanup_before() {
        let (_dir, backend) = backend().await;
        let now = now();
        let old = now - TimeDelta::days(10);

        backend
            .insert_metrics(vec![
                metric("payments", MetricKind::Cpu, 1.0, old),
                metric("payments", MetricKind::Cpu, 2.0, now),
            ])
            .await
            .unwrap();
        backend
            .insert_logs(vec![
                LogEntry::new("payments", LogLevel::Info, "old", old, Metadata::new(), None)
                    .unwrap(),
            ])
            .await
            .unwrap();

        let report = backend.cleanup_before(now - TimeDelta::days(5)).await.unwrap();
        assert_eq!(report.metrics, 1);
        assert_eq!(report.logs, 1);
        assert_eq!(report.total(), 2);

        let remaining = backend
            .query_metrics(range("payments", old, now), None)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_dir, backend) = backend().await;

        let health = backend.health_check().await.unwrap();
        assert!(health.healthy);
        assert!(health.message.contains("operational"));
        assert_eq!(health.metadata.get("backend").map(String::as_str), Some("sqlite"));
    }

    #[tokio::test]
    async fn test_get_stats() {
        let (_dir, backend) = backend().await;
        backend
            .insert_metrics(vec![metric("payments", MetricKind::Cpu, 1.0, now())])
            .await
            .unwrap();

        let stats = backend.get_stats().await.unwrap();
        assert!(stats.contains("SQLite"));
        assert!(stats.contains("1 metrics"));
        assert!(stats.contains("0 logs"));
    }
}
