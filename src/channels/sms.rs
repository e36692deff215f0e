use async_trait::async_trait;
use reqwest::Client;
use tracing::{instrument, trace};

use super::{Channel, ChannelAdapter, DeliveryError, check_response};
use crate::alerts::Alert;
use crate::config::SmsConfig;

/// Longest body sent in a single text message
const MAX_SMS_LEN: usize = 160;

/// SMS through an HTTP gateway (Twilio-style form POST with basic auth)
///
/// One request per recipient; the first failing recipient fails the delivery.
#[derive(Debug, Clone)]
pub struct SmsAdapter {
    client: Client,
    config: SmsConfig,
}

impl SmsAdapter {
    pub fn new(client: Client, config: SmsConfig) -> Self {
        Self { client, config }
    }

    fn body(alert: &Alert) -> String {
        let text = format!(
            "[{}] {}: {}",
            alert.severity.as_str().to_uppercase(),
            alert.entity_label,
            alert.message
        );
        if text.chars().count() <= MAX_SMS_LEN {
            return text;
        }
        let mut truncated: String = text.chars().take(MAX_SMS_LEN - 3).collect();
        truncated.push_str("...");
        truncated
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    #[instrument(skip_all, fields(alert_id = alert.id, recipients = self.config.to.len()))]
    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let body = Self::body(alert);

        for recipient in &self.config.to {
            let form = [
                ("To", recipient.as_str()),
                ("From", self.config.from.as_str()),
                ("Body", body.as_str()),
            ];
            let response = self
                .client
                .post(&self.config.gateway_url)
                .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
                .form(&form)
                .send()
                .await?;
            check_response(response).await?;
            trace!("sms sent to {}", recipient);
        }
        Ok(())
    }
}
