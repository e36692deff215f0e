//! Threshold rules and their evaluation
//!
//! ## Cooldown
//!
//! The engine keeps an explicit `(rule_id, entity_id) -> last alert` index. A
//! breach is suppressed while the last alert for that pair is still unresolved
//! and was created less than `rule.cooldown` ago. Once the window has fully
//! elapsed (or the alert was resolved) the next breach fires again.
//!
//! The check and the insert of the new alert happen under the same lock, so
//! concurrent evaluations of one entity cannot both fire for the same rule.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::alerts::{Alert, AlertId, AlertStore, NewAlert, Severity};
use crate::channels::Channel;
use crate::error::{PipelineError, PipelineResult};
use crate::samples::{Metadata, MetricKind};
use crate::util::{default_true, duration_secs, option_duration_secs, to_time_delta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::GreaterThan => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessOrEqual => "<=",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
        }
    }

    /// Whether `value <op> threshold` holds
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::GreaterThan => value > threshold,
            Operator::GreaterOrEqual => value >= threshold,
            Operator::LessThan => value < threshold,
            Operator::LessOrEqual => value <= threshold,
            Operator::Equal => (value - threshold).abs() < f64::EPSILON,
            Operator::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" | "gt" => Ok(Operator::GreaterThan),
            ">=" | "gte" => Ok(Operator::GreaterOrEqual),
            "<" | "lt" => Ok(Operator::LessThan),
            "<=" | "lte" => Ok(Operator::LessOrEqual),
            "==" | "eq" => Ok(Operator::Equal),
            "!=" | "ne" => Ok(Operator::NotEqual),
            other => Err(PipelineError::InvalidRule(format!(
                "unknown operator '{}'",
                other
            ))),
        }
    }
}

fn default_cooldown() -> Duration {
    Duration::from_secs(300)
}

fn default_channels() -> BTreeSet<Channel> {
    BTreeSet::from([Channel::Log])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Regex matched against the whole entity id; empty or missing matches all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_filter: Option<String>,
    pub metric_kind: MetricKind,
    pub operator: Operator,
    pub threshold: f64,
    pub severity: Severity,
    #[serde(default = "default_channels")]
    pub channels: BTreeSet<Channel>,
    #[serde(
        rename = "cooldown_secs",
        with = "duration_secs",
        default = "default_cooldown"
    )]
    pub cooldown: Duration,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        metric_kind: MetricKind,
        operator: Operator,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            entity_filter: None,
            metric_kind,
            operator,
            threshold,
            severity,
            channels: default_channels(),
            cooldown: default_cooldown(),
            enabled: true,
            created_at: Utc::now(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn entity_filter(mut self, pattern: impl Into<String>) -> Self {
        self.entity_filter = Some(pattern.into());
        self
    }

    pub fn channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn validate(&self) -> PipelineResult<()> {
        if self.id.trim().is_empty() {
            return Err(PipelineError::InvalidRule("rule id must not be empty".to_string()));
        }
        if !self.threshold.is_finite() {
            return Err(PipelineError::InvalidRule(format!(
                "rule '{}' threshold must be finite",
                self.id
            )));
        }
        Ok(())
    }
}

/// Partial update for [`RuleEngine::update_rule`]; `None` leaves a field as is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    /// `Some("")` clears the filter
    pub entity_filter: Option<String>,
    pub metric_kind: Option<MetricKind>,
    pub operator: Option<Operator>,
    pub threshold: Option<f64>,
    pub severity: Option<Severity>,
    pub channels: Option<BTreeSet<Channel>>,
    #[serde(rename = "cooldown_secs", with = "option_duration_secs")]
    pub cooldown: Option<Duration>,
    pub enabled: Option<bool>,
}

impl RulePatch {
    fn apply_to(self, rule: &mut AlertRule) {
        if let Some(name) = self.name {
            rule.name = name;
        }
        if let Some(description) = self.description {
            rule.description = description;
        }
        if let Some(filter) = self.entity_filter {
            rule.entity_filter = if filter.is_empty() { None } else { Some(filter) };
        }
        if let Some(kind) = self.metric_kind {
            rule.metric_kind = kind;
        }
        if let Some(operator) = self.operator {
            rule.operator = operator;
        }
        if let Some(threshold) = self.threshold {
            rule.threshold = threshold;
        }
        if let Some(severity) = self.severity {
            rule.severity = severity;
        }
        if let Some(channels) = self.channels {
            rule.channels = channels;
        }
        if let Some(cooldown) = self.cooldown {
            rule.cooldown = cooldown;
        }
        if let Some(enabled) = self.enabled {
            rule.enabled = enabled;
        }
    }
}

#[derive(Debug, Clone)]
enum EntityFilter {
    All,
    Pattern(Regex),
    /// Pattern that failed to compile; the rule cannot be evaluated
    Broken(String),
}

impl EntityFilter {
    fn compile(pattern: Option<&str>) -> Self {
        match pattern.map(str::trim) {
            None | Some("") => EntityFilter::All,
            Some(pattern) => match Regex::new(&format!("^(?:{})$", pattern)) {
                Ok(regex) => EntityFilter::Pattern(regex),
                Err(e) => EntityFilter::Broken(format!("invalid entity filter '{}': {}", pattern, e)),
            },
        }
    }

    fn matches(&self, entity_id: &str) -> Result<bool, &str> {
        match self {
            EntityFilter::All => Ok(true),
            EntityFilter::Pattern(regex) => Ok(regex.is_match(entity_id)),
            EntityFilter::Broken(reason) => Err(reason),
        }
    }
}

#[derive(Debug, Clone)]
struct RuleEntry {
    rule: AlertRule,
    filter: EntityFilter,
}

impl RuleEntry {
    fn new(rule: AlertRule) -> Self {
        let filter = EntityFilter::compile(rule.entity_filter.as_deref());
        if let EntityFilter::Broken(reason) = &filter {
            warn!(rule_id = %rule.id, "{}", reason);
        }
        Self { rule, filter }
    }
}

#[derive(Debug, Clone, Copy)]
struct CooldownEntry {
    alert_id: AlertId,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStats {
    pub rules: usize,
    /// Rule/entity pairs that had a value to compare
    pub evaluations: u64,
    pub alerts_created: u64,
    pub suppressed: u64,
    pub rule_errors: u64,
}

/// Result of evaluating one entity
#[derive(Debug, Default)]
pub struct Evaluation {
    pub alerts: Vec<Alert>,
    pub suppressed: usize,
    pub errors: Vec<PipelineError>,
}

#[derive(Debug)]
pub struct RuleEngine {
    rules: RwLock<BTreeMap<String, RuleEntry>>,
    cooldowns: Mutex<HashMap<(String, String), CooldownEntry>>,
    alerts: Arc<AlertStore>,
    evaluations: AtomicU64,
    alerts_created: AtomicU64,
    suppressed: AtomicU64,
    rule_errors: AtomicU64,
}

impl RuleEngine {
    pub fn new(alerts: Arc<AlertStore>) -> Self {
        Self {
            rules: RwLock::new(BTreeMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            alerts,
            evaluations: AtomicU64::new(0),
            alerts_created: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            rule_errors: AtomicU64::new(0),
        }
    }

    pub fn alerts(&self) -> &Arc<AlertStore> {
        &self.alerts
    }

    pub fn add_rule(&self, rule: AlertRule) -> PipelineResult<()> {
        rule.validate()?;
        let mut rules = self.rules.write();
        if rules.contains_key(&rule.id) {
            return Err(PipelineError::InvalidRule(format!(
                "rule '{}' already exists",
                rule.id
            )));
        }
        info!(rule_id = %rule.id, kind = %rule.metric_kind, "adding alert rule");
        rules.insert(rule.id.clone(), RuleEntry::new(rule));
        Ok(())
    }

    /// Remove a rule and forget its cooldown history
    pub fn remove_rule(&self, rule_id: &str) -> PipelineResult<AlertRule> {
        let entry = self
            .rules
            .write()
            .remove(rule_id)
            .ok_or_else(|| PipelineError::not_found("rule", rule_id))?;
        self.cooldowns.lock().retain(|(id, _), _| id != rule_id);
        info!(rule_id, "removed alert rule");
        Ok(entry.rule)
    }

    pub fn update_rule(&self, rule_id: &str, patch: RulePatch) -> PipelineResult<AlertRule> {
        let mut rules = self.rules.write();
        let entry = rules
            .get_mut(rule_id)
            .ok_or_else(|| PipelineError::not_found("rule", rule_id))?;

        let mut updated = entry.rule.clone();
        patch.apply_to(&mut updated);
        updated.validate()?;

        *entry = RuleEntry::new(updated.clone());
        info!(rule_id, enabled = updated.enabled, "updated alert rule");
        Ok(updated)
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<AlertRule> {
        self.rules.read().get(rule_id).map(|entry| entry.rule.clone())
    }

    pub fn list_rules(&self) -> Vec<AlertRule> {
        self.rules
            .read()
            .values()
            .map(|entry| entry.rule.clone())
            .collect()
    }

    /// Check every enabled rule against an entity's latest values
    ///
    /// New alerts are stored in the alert table and returned for dispatch.
    #[instrument(skip(self, entity_label, latest_values), fields(values = latest_values.len()))]
    pub fn evaluate(
        &self,
        entity_id: &str,
        entity_label: &str,
        latest_values: &HashMap<MetricKind, f64>,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let entries: Vec<RuleEntry> = self
            .rules
            .read()
            .values()
            .filter(|entry| entry.rule.enabled)
            .cloned()
            .collect();

        let mut evaluation = Evaluation::default();

        for RuleEntry { rule, filter } in entries {
            match filter.matches(entity_id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(reason) => {
                    self.rule_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(rule_id = %rule.id, "skipping rule: {}", reason);
                    evaluation.errors.push(PipelineError::RuleEvaluation {
                        rule_id: rule.id.clone(),
                        reason: reason.to_string(),
                    });
                    continue;
                }
            }

            let Some(value) = latest_values.get(&rule.metric_kind).copied() else {
                continue;
            };
            self.evaluations.fetch_add(1, Ordering::Relaxed);

            if !rule.operator.apply(value, rule.threshold) {
                continue;
            }

            let key = (rule.id.clone(), entity_id.to_string());
            let mut cooldowns = self.cooldowns.lock();

            if let Some(last) = cooldowns.get(&key) {
                let open = now - last.created_at < to_time_delta(rule.cooldown);
                if open && self.alerts.is_active(last.alert_id) {
                    self.suppressed.fetch_add(1, Ordering::Relaxed);
                    evaluation.suppressed += 1;
                    debug!(
                        rule_id = %rule.id,
                        last_alert = last.alert_id,
                        "breach suppressed by cooldown"
                    );
                    continue;
                }
            }

            let alert = self
                .alerts
                .create(build_alert(&rule, entity_id, entity_label, value), now);
            cooldowns.insert(
                key,
                CooldownEntry {
                    alert_id: alert.id,
                    created_at: alert.created_at,
                },
            );
            drop(cooldowns);

            self.alerts_created.fetch_add(1, Ordering::Relaxed);
            evaluation.alerts.push(alert);
        }

        evaluation
    }

    pub fn stats(&self) -> RuleStats {
        RuleStats {
            rules: self.rules.read().len(),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            alerts_created: self.alerts_created.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            rule_errors: self.rule_errors.load(Ordering::Relaxed),
        }
    }
}

fn build_alert(rule: &AlertRule, entity_id: &str, entity_label: &str, value: f64) -> NewAlert {
    let message = format!(
        "{}: {} is {:.2} ({} {})",
        rule.name, rule.metric_kind, value, rule.operator, rule.threshold
    );

    let mut details = Metadata::new();
    details.insert("rule_name".to_string(), Value::from(rule.name.as_str()));
    details.insert("metric_kind".to_string(), Value::from(rule.metric_kind.as_str()));
    details.insert("value".to_string(), Value::from(value));
    details.insert("threshold".to_string(), Value::from(rule.threshold));
    details.insert("operator".to_string(), Value::from(rule.operator.as_str()));

    NewAlert {
        rule_id: rule.id.clone(),
        entity_id: entity_id.to_string(),
        entity_label: entity_label.to_string(),
        severity: rule.severity,
        message,
        details,
        channels: rule.channels.clone(),
    }
}
