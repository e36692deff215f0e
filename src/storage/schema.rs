//! Table layout and column encoding
//!
//! Four append-only tables, one per sample type. Scalar fields are typed
//! columns; free-form maps (metadata, context, data, io counters, custom) are
//! JSON text. Timestamps are stored as integer microseconds since the epoch,
//! which matches the precision of the pipeline clock, so a sample read back
//! compares equal to the one that was written.
//!
//! | table     | key                              | map columns                    |
//! |-----------|----------------------------------|--------------------------------|
//! | metrics   | (entity_id, kind, timestamp)     | metadata                       |
//! | logs      | rowid                            | context                        |
//! | events    | rowid                            | data                           |
//! | snapshots | rowid                            | disk_io, network_io, custom    |
//!
//! Every table carries an index on `(entity_id, timestamp)`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Metrics,
    Logs,
    Events,
    Snapshots,
}

impl Table {
    pub const ALL: [Table; 4] = [Table::Metrics, Table::Logs, Table::Events, Table::Snapshots];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Metrics => "metrics",
            Table::Logs => "logs",
            Table::Events => "events",
            Table::Snapshots => "snapshots",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rows deleted by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub metrics: u64,
    pub logs: u64,
    pub events: u64,
    pub snapshots: u64,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.metrics + self.logs + self.events + self.snapshots
    }

    pub fn add(&mut self, table: Table, deleted: u64) {
        match table {
            Table::Metrics => self.metrics += deleted,
            Table::Logs => self.logs += deleted,
            Table::Events => self.events += deleted,
            Table::Snapshots => self.snapshots += deleted,
        }
    }
}

pub fn to_micros(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

pub fn from_micros(micros: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        StorageError::SerializationError(format!("timestamp {} out of range", micros))
    })
}

pub fn encode_json<T: Serialize>(value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| {
        StorageError::SerializationError(format!("failed to serialize column: {}", e))
    })
}

pub fn decode_json<T: DeserializeOwned>(column: &str, raw: &str) -> StorageResult<T> {
    serde_json::from_str(raw).map_err(|e| {
        StorageError::SerializationError(format!("failed to deserialize {}: {}", column, e))
    })
}
