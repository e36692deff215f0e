//! Background loops of the pipeline
//!
//! Each responsibility runs as an independent tokio task that owns its state
//! and talks to the outside through an mpsc command channel. Ingestion never
//! goes through an actor: producers write straight into the shared
//! [`TelemetryStore`](crate::store::TelemetryStore), and the actors pick the
//! data up from there on their own timers.
//!
//! ## Architecture Overview
//!
//! ```text
//!   producers ──record_*──▶ TelemetryStore (ring buffers + aggregator)
//!                               │            │             │
//!                     dirty tail│   pending  │     cutoff  │
//!                               ▼   entities ▼             ▼
//!                         SyncActor    EvaluatorActor   RetentionActor
//!                             │              │ Enqueue
//!                             ▼              ▼
//!                     StorageBackend   DispatcherActor ──▶ ChannelAdapters
//! ```
//!
//! ## Actor Types
//!
//! - **SyncActor**: flushes dirty buffers to the durable backend and runs its retention cleanup
//! - **EvaluatorActor**: runs the rule engine for entities with new metrics
//! - **DispatcherActor**: owns the alert priority queue and fans alerts out to channels
//! - **RetentionActor**: trims old samples and resolved alerts from memory
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for manual triggers
//! 2. **Request/Response**: oneshot channels for replies and statistics
//! 3. **Shutdown**: all actors share one `CancellationToken`; `spawn` returns the
//!    task's `JoinHandle` so the owner can wait for it with a deadline

pub mod dispatcher;
pub mod evaluator;
pub mod messages;
pub mod retention;
pub mod sync;

pub use dispatcher::{DispatchHandle, DispatchSettings};
pub use evaluator::EvaluatorHandle;
pub use messages::{
    ChannelStats, DispatchStats, EvaluationReport, FlushReport, RetentionReport, SyncStats,
};
pub use retention::{RetentionHandle, RetentionSettings};
pub use sync::{SyncHandle, SyncSettings};
