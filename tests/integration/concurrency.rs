//! Many producers writing into one pipeline at the same time

use std::sync::Arc;

use plugin_telemetry::{LogLevel, Metadata, MetricKind, Severity};

use crate::helpers::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers() {
    let mut config = manual_config();
    config.buffers.metrics = 100;
    config.rules = vec![threshold_rule("cpu-high", MetricKind::Cpu, 900.0, Severity::Warning)];
    let (pipeline, _clock) = create_test_pipeline(config).await;
    let pipeline = Arc::new(pipeline);
    pipeline.start().unwrap();

    let mut handles = Vec::new();
    for producer in 0..8 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            let entity = format!("entity-{}", producer % 4);
            for i in 0..250 {
                pipeline
                    .record_metric(&entity, MetricKind::Cpu, i as f64, Metadata::new())
                    .unwrap();
                if i % 50 == 0 {
                    pipeline
                        .record_log(&entity, LogLevel::Info, "tick", Metadata::new(), None)
                        .unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = pipeline.ingest_stats();
    assert_eq!(stats.accepted, 8 * (250 + 5));
    assert_eq!(stats.rejected, 0);
    // four keys, each capped at the buffer capacity
    assert_eq!(stats.buffered_metrics, 4 * 100);
    assert_eq!(stats.buffered_logs, 8 * 5);

    for rt in pipeline.query().real_time_stats(None) {
        let cpu = rt.metrics[&MetricKind::Cpu];
        assert_eq!(cpu.count, 500);
        assert_eq!(cpu.min, 0.0);
        assert_eq!(cpu.max, 249.0);
        assert!((cpu.avg - 124.5).abs() < 1e-6);
    }

    let report = pipeline.evaluate_now().await.unwrap();
    assert_eq!(report.entities, 4);
    assert_eq!(report.alerts_created, 0);

    pipeline.stop().await;
}
