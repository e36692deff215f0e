//! Sample types pushed into the pipeline
//!
//! All samples are immutable value records. Constructors validate their input
//! and reject a malformed sample as a whole ([`PipelineError::Ingestion`]), so
//! nothing partial ever reaches a buffer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, PipelineResult};

/// Free-form key/value data attached to samples
pub type Metadata = serde_json::Map<String, Value>;

/// Event type recorded when an error or critical log is ingested
pub const LOG_ERROR_EVENT: &str = "log_error";

/// Common accessors shared by every sample type
pub trait Sample: Clone + PartialEq + Send + Sync + 'static {
    fn entity_id(&self) -> &str;
    fn timestamp(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Cpu,
    Memory,
    Latency,
    ErrorRate,
    Throughput,
    DiskIo,
    NetworkIo,
    Custom,
}

impl MetricKind {
    pub const ALL: [MetricKind; 8] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Latency,
        MetricKind::ErrorRate,
        MetricKind::Throughput,
        MetricKind::DiskIo,
        MetricKind::NetworkIo,
        MetricKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Latency => "latency",
            MetricKind::ErrorRate => "error_rate",
            MetricKind::Throughput => "throughput",
            MetricKind::DiskIo => "disk_io",
            MetricKind::NetworkIo => "network_io",
            MetricKind::Custom => "custom",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = PipelineError;

    /// Accepts the canonical names as well as the `*_usage` / `response_time`
    /// names plugins commonly report.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" | "cpu_usage" => Ok(MetricKind::Cpu),
            "memory" | "memory_usage" | "mem" => Ok(MetricKind::Memory),
            "latency" | "response_time" => Ok(MetricKind::Latency),
            "error_rate" | "errors" => Ok(MetricKind::ErrorRate),
            "throughput" => Ok(MetricKind::Throughput),
            "disk_io" | "disk" => Ok(MetricKind::DiskIo),
            "network_io" | "network" => Ok(MetricKind::NetworkIo),
            "custom" => Ok(MetricKind::Custom),
            other => Err(PipelineError::Ingestion(format!(
                "unknown metric kind '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    /// Error and critical logs are escalated into events
    pub fn is_error(&self) -> bool {
        *self >= LogLevel::Error
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" | "fatal" => Ok(LogLevel::Critical),
            other => Err(PipelineError::Ingestion(format!(
                "unknown log level '{}'",
                other
            ))),
        }
    }
}

fn check_entity(entity_id: &str) -> PipelineResult<()> {
    if entity_id.trim().is_empty() {
        return Err(PipelineError::Ingestion("entity_id must not be empty".to_string()));
    }
    Ok(())
}

fn check_finite(field: &str, value: f64) -> PipelineResult<()> {
    if !value.is_finite() {
        return Err(PipelineError::Ingestion(format!(
            "{} must be a finite number, got {}",
            field, value
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub entity_id: String,
    pub kind: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Metric {
    pub fn new(
        entity_id: impl Into<String>,
        kind: MetricKind,
        value: f64,
        timestamp: DateTime<Utc>,
        metadata: Metadata,
    ) -> PipelineResult<Self> {
        let entity_id = entity_id.into();
        check_entity(&entity_id)?;
        check_finite("metric value", value)?;

        Ok(Self {
            entity_id,
            kind,
            value,
            timestamp,
            metadata,
        })
    }
}

impl Sample for Metric {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub entity_id: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl LogEntry {
    pub fn new(
        entity_id: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
        context: Metadata,
        stack_trace: Option<String>,
    ) -> PipelineResult<Self> {
        let entity_id = entity_id.into();
        check_entity(&entity_id)?;

        Ok(Self {
            entity_id,
            level,
            message: message.into(),
            timestamp,
            context,
            stack_trace,
        })
    }

    /// Event recorded alongside an error or critical log
    pub fn escalation_event(&self) -> Event {
        let mut data = Metadata::new();
        data.insert("level".to_string(), Value::from(self.level.as_str()));
        data.insert("context".to_string(), Value::Object(self.context.clone()));
        if let Some(trace) = &self.stack_trace {
            data.insert("stack_trace".to_string(), Value::from(trace.as_str()));
        }

        Event {
            entity_id: self.entity_id.clone(),
            event_type: LOG_ERROR_EVENT.to_string(),
            description: self.message.clone(),
            timestamp: self.timestamp,
            severity: self.level.as_str().to_string(),
            data,
        }
    }
}

impl Sample for LogEntry {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub entity_id: String,
    pub event_type: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub severity: String,
    #[serde(default)]
    pub data: Metadata,
}

impl Event {
    pub fn new(
        entity_id: impl Into<String>,
        event_type: impl Into<String>,
        description: impl Into<String>,
        severity: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: Metadata,
    ) -> PipelineResult<Self> {
        let entity_id = entity_id.into();
        check_entity(&entity_id)?;

        let event_type = event_type.into();
        if event_type.trim().is_empty() {
            return Err(PipelineError::Ingestion("event_type must not be empty".to_string()));
        }

        Ok(Self {
            entity_id,
            event_type,
            description: description.into(),
            timestamp,
            severity: severity.into(),
            data,
        })
    }
}

impl Sample for Event {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Caller-supplied performance fields of a snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFields {
    pub cpu: f64,
    pub memory: f64,
    pub latency: f64,
    pub error_rate: f64,
    pub request_count: u64,
    pub throughput: f64,
    #[serde(default)]
    pub disk_io: BTreeMap<String, f64>,
    #[serde(default)]
    pub network_io: BTreeMap<String, f64>,
    #[serde(default)]
    pub custom: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: SnapshotFields,
}

impl Snapshot {
    pub fn new(
        entity_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        fields: SnapshotFields,
    ) -> PipelineResult<Self> {
        let entity_id = entity_id.into();
        check_entity(&entity_id)?;

        check_finite("cpu", fields.cpu)?;
        check_finite("memory", fields.memory)?;
        check_finite("latency", fields.latency)?;
        check_finite("error_rate", fields.error_rate)?;
        check_finite("throughput", fields.throughput)?;
        for (name, value) in fields.disk_io.iter().chain(fields.network_io.iter()) {
            check_finite(name, *value)?;
        }

        Ok(Self {
            entity_id,
            timestamp,
            fields,
        })
    }
}

impl Sample for Snapshot {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
