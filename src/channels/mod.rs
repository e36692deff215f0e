//! Notification channels
//!
//! Every transport sits behind the [`ChannelAdapter`] contract: given an
//! alert, deliver it once and report success or a [`DeliveryError`]. The
//! dispatcher never retries, so adapters should not either.
//!
//! Adapters are looked up through a [`ChannelRegistry`] keyed by [`Channel`].
//! [`ChannelRegistry::from_config`] builds one adapter per enabled channel;
//! tests and embedders can register their own with [`ChannelRegistry::register`].

pub mod discord;
#[cfg(feature = "email")]
pub mod email;
pub mod log;
pub mod slack;
pub mod sms;
pub mod webhook;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::alerts::Alert;
use crate::config::ChannelsConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Slack,
    Sms,
    Discord,
    Webhook,
    Log,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Email,
        Channel::Slack,
        Channel::Sms,
        Channel::Discord,
        Channel::Webhook,
        Channel::Log,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Slack => "slack",
            Channel::Sms => "sms",
            Channel::Discord => "discord",
            Channel::Webhook => "webhook",
            Channel::Log => "log",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|channel| channel.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PipelineError::Config(format!("unknown channel '{}'", s)))
    }
}

/// Why a single delivery attempt failed
#[derive(Debug)]
pub enum DeliveryError {
    /// Request could not be sent (connection, DNS, TLS, ...)
    Transport(String),

    /// Remote side answered with a non-success status
    Rejected { status: u16, body: String },

    /// Alert could not be turned into a message for this channel
    Encoding(String),

    /// No adapter is registered for the channel
    NotConfigured(Channel),

    /// Send did not finish within the per-channel timeout
    Timeout(std::time::Duration),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Transport(msg) => write!(f, "transport error: {}", msg),
            DeliveryError::Rejected { status, body } => {
                write!(f, "rejected with status {}: {}", status, body)
            }
            DeliveryError::Encoding(msg) => write!(f, "could not build message: {}", msg),
            DeliveryError::NotConfigured(channel) => {
                write!(f, "channel {} is not configured", channel)
            }
            DeliveryError::Timeout(after) => write!(f, "timed out after {:?}", after),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}

/// Turn a non-success HTTP response into [`DeliveryError::Rejected`]
pub(crate) async fn check_response(response: reqwest::Response) -> Result<(), DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeliveryError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// A notification transport
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    /// Deliver one alert, once
    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError>;
}

#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: BTreeMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One adapter per enabled channel in the configuration
    pub fn from_config(config: &ChannelsConfig) -> Self {
        let mut registry = Self::new();
        let client = reqwest::Client::new();

        if config.log.enabled {
            registry.register(Arc::new(log::LogAdapter));
        }
        if let Some(webhook) = config.webhook.as_ref().filter(|c| c.enabled) {
            registry.register(Arc::new(webhook::WebhookAdapter::new(
                client.clone(),
                webhook.clone(),
            )));
        }
        if let Some(slack) = config.slack.as_ref().filter(|c| c.enabled) {
            registry.register(Arc::new(slack::SlackAdapter::new(
                client.clone(),
                slack.clone(),
            )));
        }
        if let Some(discord) = config.discord.as_ref().filter(|c| c.enabled) {
            registry.register(Arc::new(discord::DiscordAdapter::new(
                client.clone(),
                discord.clone(),
            )));
        }
        if let Some(sms) = config.sms.as_ref().filter(|c| c.enabled) {
            registry.register(Arc::new(sms::SmsAdapter::new(client.clone(), sms.clone())));
        }
        if let Some(email) = config.email.as_ref().filter(|c| c.enabled) {
            registry.register_email(email);
        }

        debug!("configured channels: {:?}", registry.channels());
        registry
    }

    #[cfg(feature = "email")]
    fn register_email(&mut self, config: &crate::config::EmailConfig) {
        match email::EmailAdapter::new(config.clone()) {
            Ok(adapter) => self.register(Arc::new(adapter)),
            Err(e) => warn!("email channel disabled: {}", e),
        }
    }

    #[cfg(not(feature = "email"))]
    fn register_email(&mut self, _config: &crate::config::EmailConfig) {
        warn!("email channel configured but the `email` feature is not enabled");
    }

    /// Add or replace the adapter for its channel
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.channel(), adapter);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.adapters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
