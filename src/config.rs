use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{PipelineError, PipelineResult};
use crate::rules::AlertRule;
use crate::util::default_true;

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory only (no persistence, no durable fallback for queries)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Rows older than this are deleted by the durable cleanup
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./telemetry.db")
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub interval_secs: u64,
    /// Snapshots older than twice this interval are reported as overdue
    pub snapshot_interval_secs: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            snapshot_interval_secs: 300,
        }
    }
}

/// Per-key ring buffer capacities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub metrics: usize,
    pub logs: usize,
    pub events: usize,
    pub snapshots: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            metrics: 10_000,
            logs: 5_000,
            events: 2_000,
            snapshots: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub flush_interval_secs: u64,
    pub cleanup_interval_hours: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 5,
            cleanup_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// How long samples stay in the ring buffers
    pub memory_hours: u32,
    /// How long resolved alerts stay queryable
    pub alert_history_days: u32,
    pub cleanup_interval_secs: u64,
    /// Re-seed the metric buffers from the durable store on startup
    pub warm_start: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            memory_hours: 24,
            alert_history_days: 7,
            cleanup_interval_secs: 300,
            warm_start: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Falls back to the collection interval when unset
    pub evaluation_interval_secs: Option<u64>,
    pub dispatch_interval_ms: u64,
    pub send_timeout_secs: u64,
    /// Upper bound on how long `stop` waits for a loop to wind down
    pub drain_timeout_secs: u64,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: None,
            dispatch_interval_ms: 1_000,
            send_timeout_secs: 10,
            drain_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for LogChannelConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub webhook_url: String,
    pub channel: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub url: String,
    /// Mentioned in the message content when set
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// STARTTLS before authenticating; `false` talks plain SMTP
    #[serde(default = "default_true")]
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Form-POST endpoint of the SMS gateway
    pub gateway_url: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
    pub to: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub log: LogChannelConfig,
    pub email: Option<EmailConfig>,
    pub slack: Option<SlackConfig>,
    pub sms: Option<SmsConfig>,
    pub discord: Option<DiscordConfig>,
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub collection: CollectionConfig,
    pub buffers: BufferConfig,
    pub staleness_secs: u64,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub retention: RetentionConfig,
    pub alerting: AlertingConfig,
    pub channels: ChannelsConfig,
    pub rules: Vec<AlertRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collection: CollectionConfig::default(),
            buffers: BufferConfig::default(),
            staleness_secs: 300,
            storage: StorageConfig::default(),
            sync: SyncConfig::default(),
            retention: RetentionConfig::default(),
            alerting: AlertingConfig::default(),
            channels: ChannelsConfig::default(),
            rules: Vec::new(),
        }
    }
}

impl Config {
    /// Defaults without a durable store, handy for tests and embedding
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig::None,
            ..Self::default()
        }
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.sync.flush_interval_secs)
    }

    pub fn durable_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.sync.cleanup_interval_hours as u64 * 3600)
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(
            self.alerting
                .evaluation_interval_secs
                .unwrap_or(self.collection.interval_secs),
        )
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.alerting.dispatch_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.alerting.send_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.alerting.drain_timeout_secs)
    }

    pub fn memory_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.retention.cleanup_interval_secs)
    }

    pub fn retention_days(&self) -> Option<u32> {
        match &self.storage {
            StorageConfig::None => None,
            StorageConfig::Sqlite { retention_days, .. } => Some(*retention_days),
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> PipelineResult<()> {
        let capacities = [
            ("buffers.metrics", self.buffers.metrics as u64),
            ("buffers.logs", self.buffers.logs as u64),
            ("buffers.events", self.buffers.events as u64),
            ("buffers.snapshots", self.buffers.snapshots as u64),
        ];
        let intervals = [
            ("collection.interval_secs", self.collection.interval_secs),
            (
                "collection.snapshot_interval_secs",
                self.collection.snapshot_interval_secs,
            ),
            ("staleness_secs", self.staleness_secs),
            ("sync.flush_interval_secs", self.sync.flush_interval_secs),
            (
                "sync.cleanup_interval_hours",
                self.sync.cleanup_interval_hours as u64,
            ),
            ("retention.memory_hours", self.retention.memory_hours as u64),
            (
                "retention.cleanup_interval_secs",
                self.retention.cleanup_interval_secs,
            ),
            (
                "alerting.evaluation_interval_secs",
                self.evaluation_interval().as_secs(),
            ),
            (
                "alerting.dispatch_interval_ms",
                self.alerting.dispatch_interval_ms,
            ),
            ("alerting.send_timeout_secs", self.alerting.send_timeout_secs),
        ];

        for (name, value) in capacities.iter().chain(intervals.iter()) {
            if *value == 0 {
                return Err(PipelineError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if let StorageConfig::Sqlite { retention_days: 0, .. } = self.storage {
            return Err(PipelineError::Config(
                "storage.retention_days must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {}", path.display()))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
