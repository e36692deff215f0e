//! Error types for pipeline operations

use std::fmt;

use crate::channels::Channel;
use crate::storage::StorageError;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors surfaced by the telemetry pipeline
///
/// Only `Config` (and a `Persistence` error while opening the store) is fatal;
/// everything else is isolated to the sample, rule, channel or alert involved.
#[derive(Debug)]
pub enum PipelineError {
    /// Malformed sample, rejected before anything was stored
    Ingestion(String),

    /// Durable store failure
    Persistence(StorageError),

    /// A rule definition could not be evaluated
    RuleEvaluation { rule_id: String, reason: String },

    /// Channel delivery failure or timeout
    Dispatch { channel: Channel, reason: String },

    /// Unknown alert or rule id
    NotFound { kind: &'static str, id: String },

    /// Lifecycle transition not allowed from the current state
    InvalidState(String),

    /// Rule rejected by the rule registry
    InvalidRule(String),

    /// Invalid configuration (fatal at startup)
    Config(String),

    /// A background loop is required but the pipeline is not running
    NotRunning(&'static str),
}

impl PipelineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        PipelineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Ingestion(msg) => write!(f, "rejected sample: {}", msg),
            PipelineError::Persistence(err) => write!(f, "persistence failure: {}", err),
            PipelineError::RuleEvaluation { rule_id, reason } => {
                write!(f, "rule '{}' could not be evaluated: {}", rule_id, reason)
            }
            PipelineError::Dispatch { channel, reason } => {
                write!(f, "delivery via {} failed: {}", channel, reason)
            }
            PipelineError::NotFound { kind, id } => write!(f, "{} '{}' not found", kind, id),
            PipelineError::InvalidState(msg) => write!(f, "invalid state transition: {}", msg),
            PipelineError::InvalidRule(msg) => write!(f, "invalid rule: {}", msg),
            PipelineError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            PipelineError::NotRunning(what) => write!(f, "{} is not running", what),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        PipelineError::Persistence(err)
    }
}
