use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{Channel, ChannelAdapter, DeliveryError};
use crate::alerts::{Alert, Severity};

/// Writes alerts to the process log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAdapter;

#[async_trait]
impl ChannelAdapter for LogAdapter {
    fn channel(&self) -> Channel {
        Channel::Log
    }

    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError> {
        match alert.severity {
            Severity::Info => info!(
                alert_id = alert.id,
                entity = %alert.entity_label,
                "[{}] {}", alert.severity, alert.message
            ),
            Severity::Warning => warn!(
                alert_id = alert.id,
                entity = %alert.entity_label,
                "[{}] {}", alert.severity, alert.message
            ),
            Severity::Error | Severity::Critical | Severity::Emergency => error!(
                alert_id = alert.id,
                entity = %alert.entity_label,
                "[{}] {}", alert.severity, alert.message
            ),
        }
        Ok(())
    }
}
