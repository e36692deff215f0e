use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{instrument, trace};

use super::{Channel, ChannelAdapter, DeliveryError};
use crate::alerts::Alert;
use crate::config::EmailConfig;

/// SMTP adapter
///
/// Upgrades the connection with STARTTLS unless `tls` is turned off, which is
/// only meant for a trusted local relay.
pub struct EmailAdapter {
    from: Mailbox,
    to: Vec<Mailbox>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for EmailAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailAdapter")
            .field("from", &self.from.to_string())
            .field("to", &self.to.len())
            .finish()
    }
}

impl EmailAdapter {
    /// Parses all addresses up front so a bad address disables the channel at startup
    pub fn new(config: EmailConfig) -> Result<Self, DeliveryError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::Encoding(e.to_string()))?;
        let to = config
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|e| DeliveryError::Encoding(format!("{}: {}", addr, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(DeliveryError::Encoding("no recipients configured".to_string()));
        }

        let builder = if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| DeliveryError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };
        let mut builder = builder.port(config.smtp_port);
        if let (Some(username), Some(password)) = (config.username, config.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            from,
            to,
            transport: builder.build(),
        })
    }

    fn build_email(&self, alert: &Alert) -> Result<Message, DeliveryError> {
        let subject = format!(
            "[{}] {} - {}",
            alert.severity.as_str().to_uppercase(),
            alert.entity_label,
            alert.rule_id
        );

        let mut body = format!(
            "Alert #{}\nEntity: {} ({})\nRule: {}\nSeverity: {}\nCreated: {}\n\n{}\n",
            alert.id,
            alert.entity_label,
            alert.entity_id,
            alert.rule_id,
            alert.severity,
            alert.created_at.to_rfc3339(),
            alert.message,
        );
        for (key, value) in &alert.details {
            body.push_str(&format!("\n{}: {}", key, value));
        }

        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| DeliveryError::Encoding(e.to_string()))
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    #[instrument(skip_all, fields(alert_id = alert.id))]
    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let email = self.build_email(alert)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        trace!("email sent to {} recipient(s)", self.to.len());
        Ok(())
    }
}
