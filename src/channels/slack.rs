use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::instrument;

use super::{Channel, ChannelAdapter, DeliveryError, check_response};
use crate::alerts::{Alert, Severity};
use crate::config::SlackConfig;

/// Slack incoming-webhook adapter (legacy attachments format)
#[derive(Debug, Clone)]
pub struct SlackAdapter {
    client: Client,
    config: SlackConfig,
}

impl SlackAdapter {
    pub fn new(client: Client, config: SlackConfig) -> Self {
        Self { client, config }
    }

    fn payload(&self, alert: &Alert) -> Value {
        let color = match alert.severity {
            Severity::Info => "#36a64f",
            Severity::Warning => "#f2c744",
            Severity::Error => "#e67e22",
            Severity::Critical | Severity::Emergency => "#d32f2f",
        };

        let detail = |key: &str| {
            alert
                .details
                .get(key)
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.as_f64().map(|f| format!("{:.2}", f)).unwrap_or_default(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "-".to_string())
        };

        let mut payload = json!({
            "text": format!(":rotating_light: [{}] {}", alert.severity.as_str().to_uppercase(), alert.message),
            "attachments": [{
                "color": color,
                "title": format!("{} ({})", alert.entity_label, alert.entity_id),
                "fields": [
                    { "title": "Rule", "value": &alert.rule_id, "short": true },
                    { "title": "Metric", "value": detail("metric_kind"), "short": true },
                    { "title": "Value", "value": detail("value"), "short": true },
                    { "title": "Threshold", "value": detail("threshold"), "short": true },
                ],
                "ts": alert.created_at.timestamp(),
            }]
        });

        if let Some(channel) = &self.config.channel {
            payload["channel"] = Value::from(channel.as_str());
        }
        if let Some(username) = &self.config.username {
            payload["username"] = Value::from(username.as_str());
        }
        payload
    }
}

#[async_trait]
impl ChannelAdapter for SlackAdapter {
    fn channel(&self) -> Channel {
        Channel::Slack
    }

    #[instrument(skip_all, fields(alert_id = alert.id))]
    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&self.payload(alert))
            .send()
            .await?;
        check_response(response).await
    }
}
