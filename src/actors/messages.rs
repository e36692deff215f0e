//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to one actor via mpsc
//! 2. **Replies**: oneshot channels carrying a snapshot copy of the answer
//! 3. **Ownership**: actors never hand out references to their own state

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::alerts::Alert;
use crate::channels::Channel;
use crate::error::PipelineResult;
use crate::storage::CleanupReport;
use crate::store::PruneCounts;

/// Commands that can be sent to the SyncActor
#[derive(Debug)]
pub enum SyncCommand {
    /// Flush every dirty buffer right away
    Flush {
        respond_to: oneshot::Sender<PipelineResult<FlushReport>>,
    },

    /// Run the durable retention cleanup right away
    Cleanup {
        respond_to: oneshot::Sender<PipelineResult<CleanupReport>>,
    },

    GetStats {
        respond_to: oneshot::Sender<SyncStats>,
    },
}

/// Rows written by one flush pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub metrics: u64,
    pub logs: u64,
    pub events: u64,
    pub snapshots: u64,
    /// Batches that failed and stay dirty for the next pass
    pub failed_batches: usize,
}

impl FlushReport {
    pub fn rows(&self) -> u64 {
        self.metrics + self.logs + self.events + self.snapshots
    }
}

/// Durable sync statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Flush passes that wrote every batch
    pub flushes: u64,

    /// Flush passes with at least one failed batch
    pub failed_flushes: u64,

    pub rows_written: u64,
    pub last_flush: Option<DateTime<Utc>>,

    pub cleanups: u64,
    pub rows_deleted: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Commands that can be sent to the EvaluatorActor
#[derive(Debug)]
pub enum EvaluatorCommand {
    /// Evaluate every known entity, not only those with new metrics
    EvaluateNow {
        respond_to: oneshot::Sender<EvaluationReport>,
    },
}

/// Outcome of one evaluation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub entities: usize,
    pub alerts_created: usize,
    pub suppressed: usize,
    pub rule_errors: usize,
}

/// Commands that can be sent to the DispatcherActor
#[derive(Debug)]
pub enum DispatchCommand {
    /// Queue freshly created alerts for delivery
    Enqueue { alerts: Vec<Alert> },

    /// Deliver everything queued right away; replies with the number of alerts handled
    DispatchNow {
        respond_to: oneshot::Sender<usize>,
    },

    GetStats {
        respond_to: oneshot::Sender<DispatchStats>,
    },
}

/// Per-channel delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub delivered: u64,
    pub failed: u64,
    /// Failures caused by the per-send timeout (also counted in `failed`)
    pub timeouts: u64,
}

/// Alert dispatcher statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Alerts waiting in the priority queue
    pub queued: usize,

    /// Alerts taken off the queue and fanned out
    pub dispatched: u64,

    /// Alerts dropped from the queue because they were resolved before delivery
    pub skipped_resolved: u64,

    pub channels: BTreeMap<Channel, ChannelStats>,
}

impl DispatchStats {
    pub fn delivered(&self) -> u64 {
        self.channels.values().map(|c| c.delivered).sum()
    }

    pub fn failed(&self) -> u64 {
        self.channels.values().map(|c| c.failed).sum()
    }
}

/// Commands that can be sent to the RetentionActor
#[derive(Debug)]
pub enum RetentionCommand {
    PruneNow {
        respond_to: oneshot::Sender<RetentionReport>,
    },
}

/// What one memory retention pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub samples: PruneCounts,
    pub alerts: usize,
}
