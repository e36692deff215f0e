//! Telemetry and alerting pipeline for plugin-style entities
//!
//! Producers push metrics, logs, events and snapshots into bounded in-memory
//! buffers. Background loops persist them, evaluate threshold rules and fan
//! alerts out to notification channels. Reads go through [`QueryFacade`].

pub mod actors;
pub mod aggregator;
pub mod alerts;
pub mod buffer;
pub mod channels;
pub mod clock;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod query;
pub mod rules;
pub mod samples;
pub mod storage;
pub mod store;
pub mod util;

pub use aggregator::{EntityStats, EntityStatus, RunningStats};
pub use alerts::{Alert, AlertId, AlertState, Severity};
pub use channels::{Channel, ChannelAdapter, ChannelRegistry, DeliveryError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, read_config_file};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use query::{EntitySummary, QueryFacade, RealTimeStats};
pub use rules::{AlertRule, Operator, RulePatch};
pub use samples::{
    Event, LogEntry, LogLevel, Metadata, Metric, MetricKind, Snapshot, SnapshotFields,
};
