//! Delivery through configured HTTP channels against mock servers

use plugin_telemetry::config::{SlackConfig, WebhookConfig};
use plugin_telemetry::{Channel, Metadata, MetricKind, Severity};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_alert_delivered_to_webhook_and_slack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(serde_json::json!({
            "severity": "critical",
            "entity": "Payments plugin",
            "alert": { "rule_id": "cpu-high", "entity_id": "payments" }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .and(body_partial_json(serde_json::json!({ "channel": "#alerts" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = manual_config();
    config.channels.webhook = Some(WebhookConfig {
        enabled: true,
        url: format!("{}/hook", server.uri()),
        headers: Default::default(),
    });
    config.channels.slack = Some(SlackConfig {
        enabled: true,
        webhook_url: format!("{}/slack", server.uri()),
        channel: Some("#alerts".to_string()),
        username: None,
    });
    config.rules = vec![
        threshold_rule("cpu-high", MetricKind::Cpu, 80.0, Severity::Critical)
            .channels([Channel::Webhook, Channel::Slack]),
    ];

    let (pipeline, _clock) = create_test_pipeline(config).await;
    pipeline.register_entity("payments", "Payments plugin");
    pipeline.start().unwrap();

    pipeline
        .record_metric("payments", MetricKind::Cpu, 92.5, Metadata::new())
        .unwrap();
    pipeline.evaluate_now().await.unwrap();
    pipeline.dispatch_now().await.unwrap();

    let stats = pipeline.dispatch_stats().await.unwrap();
    assert_eq!(stats.channels[&Channel::Webhook].delivered, 1);
    assert_eq!(stats.channels[&Channel::Slack].delivered, 1);

    pipeline.stop().await;
    server.verify().await;
}

#[tokio::test]
async fn test_rejected_delivery_is_counted_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = manual_config();
    config.channels.webhook = Some(WebhookConfig {
        enabled: true,
        url: format!("{}/hook", server.uri()),
        headers: Default::default(),
    });
    config.rules = vec![
        threshold_rule("cpu-high", MetricKind::Cpu, 80.0, Severity::Error)
            .channels([Channel::Webhook]),
    ];

    let (pipeline, _clock) = create_test_pipeline(config).await;
    pipeline.start().unwrap();

    pipeline
        .record_metric("payments", MetricKind::Cpu, 92.5, Metadata::new())
        .unwrap();
    pipeline.evaluate_now().await.unwrap();
    pipeline.dispatch_now().await.unwrap();
    // nothing left to retry
    assert_eq!(pipeline.dispatch_now().await.unwrap(), 0);

    let stats = pipeline.dispatch_stats().await.unwrap();
    assert_eq!(stats.channels[&Channel::Webhook].failed, 1);
    assert_eq!(stats.failed(), 1);
    assert_eq!(pipeline.query().active_alerts().len(), 1);

    pipeline.stop().await;
    server.verify().await;
}

#[tokio::test]
async fn test_disabled_channel_is_not_registered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = manual_config();
    config.channels.webhook = Some(WebhookConfig {
        enabled: false,
        url: format!("{}/hook", server.uri()),
        headers: Default::default(),
    });
    config.rules = vec![
        threshold_rule("cpu-high", MetricKind::Cpu, 80.0, Severity::Error)
            .channels([Channel::Webhook]),
    ];

    let (pipeline, _clock) = create_test_pipeline(config).await;
    pipeline.start().unwrap();

    pipeline
        .record_metric("payments", MetricKind::Cpu, 92.5, Metadata::new())
        .unwrap();
    pipeline.evaluate_now().await.unwrap();
    pipeline.dispatch_now().await.unwrap();

    let stats = pipeline.dispatch_stats().await.unwrap();
    assert_eq!(stats.channels[&Channel::Webhook].failed, 1);

    pipeline.stop().await;
    server.verify().await;
}
