use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, instrument};

use super::{Channel, ChannelAdapter, DeliveryError, check_response};
use crate::alerts::{Alert, Severity};
use crate::config::DiscordConfig;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

/// Discord webhook adapter
#[derive(Debug, Clone)]
pub struct DiscordAdapter {
    client: Client,
    config: DiscordConfig,
}

impl DiscordAdapter {
    pub fn new(client: Client, config: DiscordConfig) -> Self {
        Self { client, config }
    }

    pub fn build_alert_embed(&self, alert: &Alert) -> Embed {
        let (title, color) = match alert.severity {
            Severity::Info => ("ℹ️ Info", 5793266),          // Light blue
            Severity::Warning => ("⚠️ Warning", 16776960),  // Yellow
            Severity::Error => ("❗ Error", 15105570),       // Orange
            Severity::Critical => ("🔥 Critical", 15158332), // Red
            Severity::Emergency => ("🚨 Emergency", 10038562), // Dark red
        };

        let mut fields = vec![
            EmbedField {
                name: "🔌 Entity".to_string(),
                value: alert.entity_label.clone(),
                inline: true,
            },
            EmbedField {
                name: "📏 Rule".to_string(),
                value: alert.rule_id.clone(),
                inline: true,
            },
        ];

        let value = alert.details.get("value").and_then(Value::as_f64);
        let threshold = alert.details.get("threshold").and_then(Value::as_f64);
        if let (Some(value), Some(threshold)) = (value, threshold) {
            fields.push(EmbedField {
                name: "📈 Value".to_string(),
                value: format!("{:.2}", value),
                inline: true,
            });
            fields.push(EmbedField {
                name: "⚠️ Threshold".to_string(),
                value: format!("{:.2}", threshold),
                inline: true,
            });
            fields.push(EmbedField {
                name: "📊 Status".to_string(),
                value: create_progress_bar(value, threshold),
                inline: false,
            });
        }

        Embed {
            title: Some(format!("{} alert", title)),
            description: Some(alert.message.clone()),
            color: Some(color),
            fields,
            footer: Some(EmbedFooter {
                text: format!("Alert #{} | {}", alert.id, alert.entity_id),
            }),
            timestamp: Some(alert.created_at.to_rfc3339()),
        }
    }

    pub fn build_message(&self, alert: &Alert) -> Message {
        let mut builder = MessageBuilder::new().add_embed(self.build_alert_embed(alert));
        if let Some(user_id) = &self.config.user_id {
            builder = builder.content(format!(
                "🚨 ({} ~ {}) <@{user_id}>",
                alert.entity_label, alert.severity
            ));
        }
        builder.build()
    }
}

fn create_progress_bar(current: f64, limit: f64) -> String {
    if limit == 0.0 {
        return format!("`{:.2}`", current);
    }
    let ratio = current / limit;
    let percentage = ratio * 100.0;
    let filled = ((ratio * 10.0).max(0.0) as usize).min(10);
    let empty = 10 - filled;

    let bar = "█".repeat(filled) + &"░".repeat(empty);
    let status_emoji = if percentage >= 100.0 {
        "🔴"
    } else if percentage >= 80.0 {
        "🟠"
    } else if percentage >= 60.0 {
        "🟡"
    } else {
        "🟢"
    };

    format!("{} `{}` {:.1}% of threshold", status_emoji, bar, percentage)
}

#[async_trait]
impl ChannelAdapter for DiscordAdapter {
    fn channel(&self) -> Channel {
        Channel::Discord
    }

    #[instrument(skip_all, fields(alert_id = alert.id))]
    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let message = self.build_message(alert);
        let response = self.client.post(&self.config.url).json(&message).send().await?;
        check_response(response).await.inspect_err(|e| {
            error!("Discord API error response: {}", e);
        })
    }
}
