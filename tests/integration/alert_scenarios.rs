//! End-to-end alerting scenarios driven by a manual clock

use assert_matches::assert_matches;
use chrono::TimeDelta;
use plugin_telemetry::{
    EntityStatus, LogLevel, Metadata, MetricKind, PipelineError, RulePatch, Severity,
    samples::LOG_ERROR_EVENT,
};

use crate::helpers::*;

#[tokio::test]
async fn test_cooldown_scenario_85_90_95() {
    let mut config = manual_config();
    config.rules = vec![threshold_rule("cpu-high", MetricKind::Cpu, 80.0, Severity::Critical)];
    let (pipeline, clock) = create_test_pipeline(config).await;
    pipeline.start().unwrap();

    pipeline
        .record_named_metric("E1", "cpu_usage", 85.0, Metadata::new())
        .unwrap();
    let first = pipeline.evaluate_now().await.unwrap();
    assert_eq!(first.alerts_created, 1);

    clock.advance(TimeDelta::minutes(2));
    pipeline
        .record_named_metric("E1", "cpu_usage", 90.0, Metadata::new())
        .unwrap();
    let second = pipeline.evaluate_now().await.unwrap();
    assert_eq!(second.alerts_created, 0);
    assert_eq!(second.suppressed, 1);

    clock.advance(TimeDelta::minutes(4));
    pipeline
        .record_named_metric("E1", "cpu_usage", 95.0, Metadata::new())
        .unwrap();
    let third = pipeline.evaluate_now().await.unwrap();
    assert_eq!(third.alerts_created, 1);

    let active = pipeline.query().active_alerts();
    assert_eq!(active.len(), 2);
    assert!(active.iter().all(|alert| alert.severity == Severity::Critical));
    assert_eq!(pipeline.rule_stats().suppressed, 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_resolved_alert_reopens_cooldown() {
    let mut config = manual_config();
    config.rules = vec![threshold_rule("cpu-high", MetricKind::Cpu, 80.0, Severity::Warning)];
    let (pipeline, clock) = create_test_pipeline(config).await;
    pipeline.start().unwrap();

    pipeline
        .record_metric("E1", MetricKind::Cpu, 85.0, Metadata::new())
        .unwrap();
    pipeline.evaluate_now().await.unwrap();
    let alert = pipeline.query().active_alerts().remove(0);

    let resolved = pipeline.resolve(alert.id).unwrap();
    clock.advance(TimeDelta::seconds(30));
    let again = pipeline.resolve(alert.id).unwrap();
    assert_eq!(again.resolved_at, resolved.resolved_at);

    clock.advance(TimeDelta::seconds(30));
    pipeline
        .record_metric("E1", MetricKind::Cpu, 86.0, Metadata::new())
        .unwrap();
    let report = pipeline.evaluate_now().await.unwrap();
    assert_eq!(report.alerts_created, 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let mut config = manual_config();
    config.rules = vec![threshold_rule("cpu-high", MetricKind::Cpu, 80.0, Severity::Error)];
    let (pipeline, _clock) = create_test_pipeline(config).await;
    pipeline.start().unwrap();

    assert_matches!(
        pipeline.acknowledge(999, "oncall"),
        Err(PipelineError::NotFound { kind: "alert", .. })
    );
    assert_matches!(pipeline.resolve(999), Err(PipelineError::NotFound { .. }));

    pipeline
        .record_metric("E1", MetricKind::Cpu, 99.0, Metadata::new())
        .unwrap();
    pipeline.evaluate_now().await.unwrap();
    let alert = pipeline.query().active_alerts().remove(0);

    pipeline.resolve(alert.id).unwrap();
    assert_matches!(
        pipeline.acknowledge(alert.id, "oncall"),
        Err(PipelineError::InvalidState(_))
    );

    let history = pipeline.query().alert_history(1);
    assert_eq!(history.len(), 1);
    assert!(history[0].resolved);
    assert!(!history[0].acknowledged);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_multiple_rules_fire_independently() {
    let mut config = manual_config();
    config.rules = vec![
        threshold_rule("cpu-high", MetricKind::Cpu, 80.0, Severity::Critical),
        threshold_rule("cpu-warm", MetricKind::Cpu, 60.0, Severity::Warning),
        threshold_rule("latency-high", MetricKind::Latency, 500.0, Severity::Error),
    ];
    let (pipeline, _clock) = create_test_pipeline(config).await;
    pipeline.start().unwrap();

    pipeline
        .record_metric("E1", MetricKind::Cpu, 90.0, Metadata::new())
        .unwrap();
    pipeline
        .record_metric("E1", MetricKind::Latency, 100.0, Metadata::new())
        .unwrap();

    let report = pipeline.evaluate_now().await.unwrap();
    assert_eq!(report.alerts_created, 2);

    let rules: Vec<String> = pipeline
        .query()
        .active_alerts()
        .into_iter()
        .map(|alert| alert.rule_id)
        .collect();
    assert_eq!(rules, vec!["cpu-high".to_string(), "cpu-warm".to_string()]);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_disabled_and_filtered_rules() {
    let mut config = manual_config();
    config.rules = vec![
        threshold_rule("payments-cpu", MetricKind::Cpu, 50.0, Severity::Warning)
            .entity_filter("payments-.*"),
        threshold_rule("any-cpu", MetricKind::Cpu, 50.0, Severity::Info).disabled(),
    ];
    let (pipeline, _clock) = create_test_pipeline(config).await;
    pipeline.start().unwrap();

    pipeline
        .record_metric("payments-eu", MetricKind::Cpu, 70.0, Metadata::new())
        .unwrap();
    pipeline
        .record_metric("search", MetricKind::Cpu, 70.0, Metadata::new())
        .unwrap();
    pipeline
        .record_metric("my-payments-eu", MetricKind::Cpu, 70.0, Metadata::new())
        .unwrap();

    let report = pipeline.evaluate_now().await.unwrap();
    assert_eq!(report.entities, 3);
    assert_eq!(report.alerts_created, 1);
    assert_eq!(pipeline.query().active_alerts()[0].entity_id, "payments-eu");

    pipeline
        .update_rule(
            "any-cpu",
            RulePatch {
                enabled: Some(true),
                threshold: Some(65.0),
                ..RulePatch::default()
            },
        )
        .unwrap();
    let report = pipeline.evaluate_now().await.unwrap();
    // payments-eu is still in cooldown for payments-cpu
    assert_eq!(report.alerts_created, 3);
    assert_eq!(report.suppressed, 1);

    pipeline.remove_rule("any-cpu").unwrap();
    assert_eq!(pipeline.list_rules().len(), 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_critical_log_records_event() {
    let (pipeline, _clock) = create_test_pipeline(manual_config()).await;

    pipeline
        .record_log("E1", LogLevel::Critical, "disk full", Metadata::new(), None)
        .unwrap();

    let events = pipeline.query().events("E1", None, 1).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, LOG_ERROR_EVENT);
    assert_eq!(events[0].description, "disk full");
    assert_eq!(events[0].severity, "critical");

    let summary = pipeline.query().summary("E1");
    assert_eq!(summary.errors_24h, 1);
    assert_eq!(summary.recent_errors[0].message, "disk full");
}

#[tokio::test]
async fn test_entity_goes_inactive_after_staleness() {
    let (pipeline, clock) = create_test_pipeline(manual_config()).await;

    pipeline
        .record_metric("E1", MetricKind::Memory, 40.0, Metadata::new())
        .unwrap();
    assert_eq!(pipeline.query().summary("E1").status, EntityStatus::Active);

    clock.advance(TimeDelta::seconds(301));
    assert_eq!(pipeline.query().summary("E1").status, EntityStatus::Inactive);

    let stats = pipeline.query().real_time_stats(Some("E1"));
    assert_eq!(stats[0].status, EntityStatus::Inactive);
    assert_eq!(stats[0].metrics[&MetricKind::Memory].count, 1);
}

#[tokio::test]
async fn test_rejected_samples_are_counted() {
    let (pipeline, _clock) = create_test_pipeline(manual_config()).await;

    assert_matches!(
        pipeline.record_metric("", MetricKind::Cpu, 1.0, Metadata::new()),
        Err(PipelineError::Ingestion(_))
    );
    assert_matches!(
        pipeline.record_metric("E1", MetricKind::Cpu, f64::INFINITY, Metadata::new()),
        Err(PipelineError::Ingestion(_))
    );
    pipeline
        .record_metric("E1", MetricKind::Cpu, 1.0, Metadata::new())
        .unwrap();

    let stats = pipeline.ingest_stats();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.buffered_metrics, 1);
}
