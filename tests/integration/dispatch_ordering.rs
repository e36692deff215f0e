//! Priority ordering and delivery bookkeeping of the dispatcher

use std::time::Duration;

use plugin_telemetry::{Channel, Metadata, MetricKind, PipelineBuilder, Severity};

use crate::helpers::*;

#[tokio::test]
async fn test_alerts_dispatched_by_severity() {
    let mut config = manual_config();
    config.rules = vec![
        threshold_rule("a-cpu", MetricKind::Cpu, 10.0, Severity::Warning),
        threshold_rule("b-memory", MetricKind::Memory, 10.0, Severity::Critical),
        threshold_rule("c-latency", MetricKind::Latency, 10.0, Severity::Info),
        threshold_rule("d-errors", MetricKind::ErrorRate, 10.0, Severity::Emergency),
    ];
    let recorder = RecordingAdapter::new(Channel::Log);
    let pipeline = PipelineBuilder::new(config)
        .channel(recorder.clone())
        .build()
        .await
        .unwrap();
    pipeline.start().unwrap();

    for kind in [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Latency,
        MetricKind::ErrorRate,
    ] {
        pipeline
            .record_metric("E1", kind, 50.0, Metadata::new())
            .unwrap();
    }

    let report = pipeline.evaluate_now().await.unwrap();
    assert_eq!(report.alerts_created, 4);
    assert_eq!(pipeline.dispatch_now().await.unwrap(), 4);

    assert_eq!(
        recorder.severities(),
        vec![
            Severity::Emergency,
            Severity::Critical,
            Severity::Warning,
            Severity::Info
        ]
    );

    let stats = pipeline.dispatch_stats().await.unwrap();
    assert_eq!(stats.dispatched, 4);
    assert_eq!(stats.delivered(), 4);
    assert_eq!(stats.queued, 0);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_resolved_before_dispatch_is_skipped() {
    let mut config = manual_config();
    config.rules = vec![threshold_rule("cpu-high", MetricKind::Cpu, 80.0, Severity::Critical)];
    let recorder = RecordingAdapter::new(Channel::Log);
    let pipeline = PipelineBuilder::new(config)
        .channel(recorder.clone())
        .build()
        .await
        .unwrap();
    pipeline.start().unwrap();

    pipeline
        .record_metric("E1", MetricKind::Cpu, 95.0, Metadata::new())
        .unwrap();
    pipeline.evaluate_now().await.unwrap();

    let alert = pipeline.query().active_alerts().remove(0);
    pipeline.resolve(alert.id).unwrap();

    assert_eq!(pipeline.dispatch_now().await.unwrap(), 1);
    assert!(recorder.sent.lock().is_empty());
    assert_eq!(pipeline.dispatch_stats().await.unwrap().skipped_resolved, 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_unconfigured_channel_counts_failure_and_keeps_alert_active() {
    let mut config = manual_config();
    config.rules = vec![
        threshold_rule("cpu-high", MetricKind::Cpu, 80.0, Severity::Critical)
            .channels([Channel::Log, Channel::Sms]),
    ];
    let recorder = RecordingAdapter::new(Channel::Log);
    let pipeline = PipelineBuilder::new(config)
        .channel(recorder.clone())
        .build()
        .await
        .unwrap();
    pipeline.start().unwrap();

    pipeline
        .record_metric("E1", MetricKind::Cpu, 95.0, Metadata::new())
        .unwrap();
    pipeline.evaluate_now().await.unwrap();
    pipeline.dispatch_now().await.unwrap();

    let stats = pipeline.dispatch_stats().await.unwrap();
    assert_eq!(stats.channels[&Channel::Log].delivered, 1);
    assert_eq!(stats.channels[&Channel::Sms].failed, 1);
    assert_eq!(recorder.sent.lock().len(), 1);
    assert_eq!(pipeline.query().active_alerts().len(), 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_timers_evaluate_and_dispatch_without_triggers() {
    let mut config = manual_config();
    config.alerting.evaluation_interval_secs = Some(1);
    config.alerting.dispatch_interval_ms = 50;
    config.rules = vec![threshold_rule("cpu-high", MetricKind::Cpu, 80.0, Severity::Warning)];
    let recorder = RecordingAdapter::new(Channel::Log);
    let pipeline = PipelineBuilder::new(config)
        .channel(recorder.clone())
        .build()
        .await
        .unwrap();
    pipeline.start().unwrap();

    pipeline
        .record_metric("E1", MetricKind::Cpu, 95.0, Metadata::new())
        .unwrap();

    let mut delivered = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !recorder.sent.lock().is_empty() {
            delivered = true;
            break;
        }
    }
    assert!(delivered, "alert should be delivered by the background loops");

    pipeline.stop().await;
}

#[tokio::test]
async fn test_stop_drains_queued_alerts() {
    let mut config = manual_config();
    config.rules = vec![threshold_rule("cpu-high", MetricKind::Cpu, 80.0, Severity::Warning)];
    let recorder = RecordingAdapter::new(Channel::Log);
    let pipeline = PipelineBuilder::new(config)
        .channel(recorder.clone())
        .build()
        .await
        .unwrap();
    pipeline.start().unwrap();

    pipeline
        .record_metric("E1", MetricKind::Cpu, 95.0, Metadata::new())
        .unwrap();
    pipeline.evaluate_now().await.unwrap();
    assert!(recorder.sent.lock().is_empty());

    pipeline.stop().await;
    assert_eq!(recorder.sent.lock().len(), 1);
}
