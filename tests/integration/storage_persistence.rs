//! SQLite persistence through the full pipeline

use std::path::Path;

use chrono::TimeDelta;
use plugin_telemetry::config::StorageConfig;
use plugin_telemetry::{Clock, Config, LogLevel, Metadata, MetricKind, SnapshotFields};
use serde_json::json;

use crate::helpers::*;

fn sqlite_config(path: &Path) -> Config {
    let mut config = manual_config();
    config.storage = StorageConfig::Sqlite {
        path: path.to_path_buf(),
        retention_days: 30,
    };
    config
}

#[tokio::test]
async fn test_flushed_samples_read_back_identically() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = sqlite_config(&dir.path().join("telemetry.db"));
    config.buffers.metrics = 2;
    let (pipeline, clock) = create_test_pipeline(config).await;
    pipeline.start().unwrap();

    let mut metadata = Metadata::new();
    metadata.insert("host".to_string(), json!("eu-1"));
    metadata.insert("tags".to_string(), json!(["a", "b"]));

    let mut recorded = Vec::new();
    for i in 0..5 {
        recorded.push(
            pipeline
                .record_metric("payments", MetricKind::Latency, 100.0 + i as f64, metadata.clone())
                .unwrap(),
        );
        pipeline.flush_now().await.unwrap();
        clock.advance(TimeDelta::milliseconds(1500));
    }

    // only the last two are still in memory
    assert_eq!(pipeline.ingest_stats().buffered_metrics, 2);
    assert_eq!(pipeline.ingest_stats().lost_unsynced, 0);

    let history = pipeline
        .query()
        .metrics("payments", Some(MetricKind::Latency), 1)
        .await;
    assert_eq!(history, recorded);

    let stats = pipeline.sync_stats().await.unwrap();
    assert_eq!(stats.rows_written, 5);
    assert_eq!(stats.failed_flushes, 0);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_samples_at_one_instant_survive_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = sqlite_config(&dir.path().join("telemetry.db"));
    config.buffers.metrics = 2;
    config.buffers.logs = 2;
    let (pipeline, _clock) = create_test_pipeline(config).await;
    pipeline.start().unwrap();

    // the clock never moves, so every sample shares one timestamp
    for i in 0..3 {
        pipeline
            .record_metric("payments", MetricKind::Cpu, 100.0 + i as f64, Metadata::new())
            .unwrap();
        pipeline
            .record_log("payments", LogLevel::Info, &format!("line {}", i), Metadata::new(), None)
            .unwrap();
        pipeline.flush_now().await.unwrap();
    }

    let stats = pipeline.sync_stats().await.unwrap();
    assert_eq!(stats.rows_written, 6);

    let values: Vec<f64> = pipeline
        .query()
        .metrics("payments", Some(MetricKind::Cpu), 1)
        .await
        .iter()
        .map(|m| m.value)
        .collect();
    assert_eq!(values, vec![100.0, 101.0, 102.0]);

    let messages: Vec<String> = pipeline
        .query()
        .logs("payments", None, 1)
        .await
        .into_iter()
        .map(|l| l.message)
        .collect();
    assert_eq!(messages, vec!["line 0", "line 1", "line 2"]);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_logs_events_and_snapshots_persist() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = sqlite_config(&dir.path().join("telemetry.db"));
    config.buffers.logs = 1;
    config.buffers.events = 1;
    config.buffers.snapshots = 1;
    let (pipeline, clock) = create_test_pipeline(config).await;
    pipeline.start().unwrap();

    let first = pipeline
        .record_log(
            "payments",
            LogLevel::Error,
            "timeout talking to bank",
            Metadata::new(),
            Some("at charge()".to_string()),
        )
        .unwrap();
    let snapshot = pipeline
        .create_snapshot(
            "payments",
            SnapshotFields {
                cpu: 12.5,
                memory: 512.0,
                request_count: 42,
                disk_io: [("read".to_string(), 1.5)].into(),
                ..SnapshotFields::default()
            },
        )
        .unwrap();
    let report = pipeline.flush_now().await.unwrap();
    assert_eq!(report.logs, 1);
    assert_eq!(report.events, 1);
    assert_eq!(report.snapshots, 1);

    clock.advance(TimeDelta::seconds(5));
    pipeline
        .record_log("payments", LogLevel::Info, "recovered", Metadata::new(), None)
        .unwrap();
    pipeline
        .create_snapshot("payments", SnapshotFields::default())
        .unwrap();
    pipeline.flush_now().await.unwrap();

    let errors = pipeline
        .query()
        .logs("payments", Some(LogLevel::Error), 1)
        .await;
    assert_eq!(errors, vec![first]);

    let all_logs = pipeline.query().logs("payments", None, 1).await;
    assert_eq!(all_logs.len(), 2);

    let events = pipeline.query().events("payments", Some("log_error"), 1).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].data["stack_trace"], json!("at charge()"));

    let snapshots = pipeline.query().snapshots("payments", 1).await;
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0], snapshot);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_warm_start_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.db");

    {
        let (pipeline, clock) = create_test_pipeline(sqlite_config(&path)).await;
        pipeline.start().unwrap();
        pipeline
            .record_metric("payments", MetricKind::Cpu, 40.0, Metadata::new())
            .unwrap();
        clock.advance(TimeDelta::seconds(1));
        pipeline
            .record_metric("payments", MetricKind::Cpu, 60.0, Metadata::new())
            .unwrap();
        // stop flushes whatever is still dirty
        pipeline.stop().await;
    }

    let (pipeline, _clock) = create_test_pipeline(sqlite_config(&path)).await;
    let stats = pipeline.query().real_time_stats(Some("payments"));
    let cpu = stats[0].metrics[&MetricKind::Cpu];
    assert_eq!(cpu.count, 2);
    assert_eq!(cpu.avg, 50.0);
    assert_eq!(pipeline.ingest_stats().buffered_metrics, 2);

    let health = pipeline.backend_health().await.unwrap();
    assert!(health.healthy);
    let summary = pipeline.backend_stats().await.unwrap().unwrap();
    assert!(summary.contains("2 metrics"), "unexpected stats: {summary}");
}

#[tokio::test]
async fn test_retention_cleanup_deletes_old_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, clock) = create_test_pipeline(sqlite_config(&dir.path().join("t.db"))).await;
    let now = clock.now();
    pipeline.start().unwrap();

    clock.set(now - TimeDelta::days(40));
    pipeline
        .record_metric("payments", MetricKind::Cpu, 1.0, Metadata::new())
        .unwrap();
    clock.set(now);
    pipeline
        .record_metric("payments", MetricKind::Cpu, 2.0, Metadata::new())
        .unwrap();
    pipeline.flush_now().await.unwrap();

    let report = pipeline.cleanup_now().await.unwrap();
    assert_eq!(report.metrics, 1);

    let history = pipeline
        .query()
        .metrics("payments", Some(MetricKind::Cpu), 24 * 60)
        .await;
    assert_eq!(history.len(), 2, "memory still holds the old sample");

    let pruned = pipeline.prune_now().await.unwrap();
    assert_eq!(pruned.samples.metrics, 1);
    let history = pipeline
        .query()
        .metrics("payments", Some(MetricKind::Cpu), 24 * 60)
        .await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].value, 2.0);

    pipeline.stop().await;
}
