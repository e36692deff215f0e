//! Alerts and their lifecycle
//!
//! ```text
//! CREATED ──acknowledge──▶ ACKNOWLEDGED ──resolve──▶ RESOLVED
//!    └──────────────────resolve─────────────────────────▲
//! ```
//!
//! `RESOLVED` is terminal. Only explicit acknowledge/resolve calls move an
//! alert; delivery failures never change its state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::channels::Channel;
use crate::error::{PipelineError, PipelineResult};
use crate::samples::Metadata;

pub type AlertId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
    Emergency,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
            Severity::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            "emergency" => Ok(Severity::Emergency),
            other => Err(PipelineError::InvalidRule(format!(
                "unknown severity '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Created,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub rule_id: String,
    pub entity_id: String,
    pub entity_label: String,
    pub severity: Severity,
    pub message: String,
    pub details: Metadata,
    pub created_at: DateTime<Utc>,
    pub channels: BTreeSet<Channel>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn state(&self) -> AlertState {
        if self.resolved {
            AlertState::Resolved
        } else if self.acknowledged {
            AlertState::Acknowledged
        } else {
            AlertState::Created
        }
    }

    pub fn is_active(&self) -> bool {
        !self.resolved
    }
}

/// Everything the rule engine decides about a new alert
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub rule_id: String,
    pub entity_id: String,
    pub entity_label: String,
    pub severity: Severity,
    pub message: String,
    pub details: Metadata,
    pub channels: BTreeSet<Channel>,
}

/// In-memory alert table
///
/// Callers only ever receive clones; the table itself stays behind the lock.
#[derive(Debug)]
pub struct AlertStore {
    next_id: AtomicU64,
    alerts: RwLock<BTreeMap<AlertId, Alert>>,
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            alerts: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn create(&self, new: NewAlert, now: DateTime<Utc>) -> Alert {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let alert = Alert {
            id,
            rule_id: new.rule_id,
            entity_id: new.entity_id,
            entity_label: new.entity_label,
            severity: new.severity,
            message: new.message,
            details: new.details,
            created_at: now,
            channels: new.channels,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved: false,
            resolved_at: None,
        };
        self.alerts.write().insert(id, alert.clone());
        info!(
            alert_id = id,
            rule_id = %alert.rule_id,
            entity_id = %alert.entity_id,
            severity = %alert.severity,
            "alert created"
        );
        alert
    }

    pub fn get(&self, id: AlertId) -> Option<Alert> {
        self.alerts.read().get(&id).cloned()
    }

    pub fn is_active(&self, id: AlertId) -> bool {
        self.alerts
            .read()
            .get(&id)
            .is_some_and(|alert| alert.is_active())
    }

    /// Acknowledge an unresolved alert; repeated calls keep the first actor
    pub fn acknowledge(&self, id: AlertId, actor: &str, now: DateTime<Utc>) -> PipelineResult<Alert> {
        let mut alerts = self.alerts.write();
        let alert = alerts
            .get_mut(&id)
            .ok_or_else(|| PipelineError::not_found("alert", id))?;

        if alert.resolved {
            return Err(PipelineError::InvalidState(format!(
                "alert {} is already resolved",
                id
            )));
        }

        if !alert.acknowledged {
            alert.acknowledged = true;
            alert.acknowledged_by = Some(actor.to_string());
            alert.acknowledged_at = Some(now);
            info!(alert_id = id, actor, "alert acknowledged");
        } else {
            debug!(alert_id = id, "alert already acknowledged");
        }

        Ok(alert.clone())
    }

    /// Resolve an alert; resolving twice keeps the first `resolved_at`
    pub fn resolve(&self, id: AlertId, now: DateTime<Utc>) -> PipelineResult<Alert> {
        let mut alerts = self.alerts.write();
        let alert = alerts
            .get_mut(&id)
            .ok_or_else(|| PipelineError::not_found("alert", id))?;

        if !alert.resolved {
            alert.resolved = true;
            alert.resolved_at = Some(now);
            info!(alert_id = id, "alert resolved");
        } else {
            debug!(alert_id = id, "alert already resolved");
        }

        Ok(alert.clone())
    }

    /// Unresolved alerts, most severe first, then oldest first
    pub fn active(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self
            .alerts
            .read()
            .values()
            .filter(|alert| alert.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        active
    }

    pub fn active_for(&self, entity_id: &str) -> Vec<Alert> {
        self.active()
            .into_iter()
            .filter(|alert| alert.entity_id == entity_id)
            .collect()
    }

    /// Alerts created at or after `since`, newest first
    pub fn history(&self, since: DateTime<Utc>) -> Vec<Alert> {
        self.alerts
            .read()
            .values()
            .rev()
            .filter(|alert| alert.created_at >= since)
            .cloned()
            .collect()
    }

    /// Forget resolved alerts whose resolution is older than `cutoff`
    pub fn prune_resolved_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut alerts = self.alerts.write();
        let before = alerts.len();
        alerts.retain(|_, alert| alert.resolved_at.is_none_or(|resolved| resolved >= cutoff));
        before - alerts.len()
    }

    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }
}
