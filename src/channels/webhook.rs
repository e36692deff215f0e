use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{instrument, trace};

use super::{Channel, ChannelAdapter, DeliveryError, check_response};
use crate::alerts::Alert;
use crate::config::WebhookConfig;

/// POSTs the alert as JSON to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookAdapter {
    client: Client,
    config: WebhookConfig,
}

impl WebhookAdapter {
    pub fn new(client: Client, config: WebhookConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    fn channel(&self) -> Channel {
        Channel::Webhook
    }

    #[instrument(skip_all, fields(alert_id = alert.id))]
    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let payload = json!({
            "alert": alert,
            "message": alert.message,
            "entity": alert.entity_label,
            "severity": alert.severity,
            "timestamp": alert.created_at.to_rfc3339(),
        });

        let mut request = self.client.post(&self.config.url).json(&payload);
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }

        check_response(request.send().await?).await?;
        trace!("webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::Severity;
    use crate::channels::test_support::sample_alert;
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> WebhookAdapter {
        WebhookAdapter::new(
            Client::new(),
            WebhookConfig {
                enabled: true,
                url: format!("{}/hook", server.uri()),
                headers: [("X-Token".to_string(), "secret".to_string())].into(),
            },
        )
    }

    #[tokio::test]
    async fn test_webhook_posts_alert_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("X-Token", "secret"))
            .and(body_partial_json(serde_json::json!({
                "severity": "critical",
                "entity": "Payments plugin",
                "alert": { "id": 7, "rule_id": "cpu-high" }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        adapter(&server)
            .send(&sample_alert(Severity::Critical))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_non_success_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let result = adapter(&server).send(&sample_alert(Severity::Info)).await;

        assert_matches!(result, Err(DeliveryError::Rejected { status: 503, body }) if body == "busy");
    }
}
