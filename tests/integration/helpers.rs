//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use plugin_telemetry::{
    Alert, AlertRule, Channel, ChannelAdapter, Config, DeliveryError, ManualClock, MetricKind,
    Operator, Pipeline, PipelineBuilder, Severity,
};

/// In-memory config with tickers slow enough that tests drive every step
pub fn manual_config() -> Config {
    let mut config = Config::in_memory();
    config.collection.interval_secs = 3600;
    config.sync.flush_interval_secs = 3600;
    config.retention.cleanup_interval_secs = 3600;
    config.alerting.dispatch_interval_ms = 3_600_000;
    config.alerting.drain_timeout_secs = 2;
    config
}

pub fn threshold_rule(id: &str, kind: MetricKind, threshold: f64, severity: Severity) -> AlertRule {
    AlertRule::new(id, id, kind, Operator::GreaterThan, threshold, severity)
        .cooldown(Duration::from_secs(300))
}

/// Built (not started) pipeline on a manual clock
pub async fn create_test_pipeline(config: Config) -> (Pipeline, ManualClock) {
    let clock = ManualClock::starting_now();
    let pipeline = PipelineBuilder::new(config)
        .clock(Arc::new(clock.clone()))
        .build()
        .await
        .unwrap();
    (pipeline, clock)
}

/// Adapter that records every alert it is asked to send
#[derive(Debug)]
pub struct RecordingAdapter {
    pub channel: Channel,
    pub sent: Mutex<Vec<Alert>>,
}

impl RecordingAdapter {
    pub fn new(channel: Channel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn severities(&self) -> Vec<Severity> {
        self.sent.lock().iter().map(|alert| alert.severity).collect()
    }
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError> {
        self.sent.lock().push(alert.clone());
        Ok(())
    }
}
