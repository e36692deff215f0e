//! Durable storage for samples
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` allows swapping implementations
//! - **Async**: all operations are async so the sync actor never blocks ingestion
//! - **Batch-oriented**: the sync actor hands over whole dirty batches per key
//!
//! ## Backends
//!
//! - **SQLite** (default, feature `storage-sqlite`): embedded database in WAL mode
//! - **None**: memory only; queries never fall back to disk
//!
//! ## Usage
//!
//! ```no_run
//! use plugin_telemetry::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./telemetry.db").await?;
//!     println!("{}", backend.get_stats().await?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;
#[cfg(test)]
pub(crate) mod test_support;

pub use backend::{HealthStatus, QueryRange, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use schema::{CleanupReport, Table};
