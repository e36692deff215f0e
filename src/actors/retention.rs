//! RetentionActor - Trims in-memory state
//!
//! Drops buffered samples older than the memory window and resolved alerts
//! older than the alert history window. Durable rows are handled by the
//! sync actor's own cleanup.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::messages::{RetentionCommand, RetentionReport};
use crate::alerts::AlertStore;
use crate::error::{PipelineError, PipelineResult};
use crate::store::TelemetryStore;

#[derive(Debug, Clone, Copy)]
pub struct RetentionSettings {
    pub interval: Duration,
    pub memory_window: TimeDelta,
    pub alert_history: TimeDelta,
}

pub struct RetentionActor {
    store: Arc<TelemetryStore>,
    alerts: Arc<AlertStore>,
    settings: RetentionSettings,
    command_rx: mpsc::Receiver<RetentionCommand>,
    cancel: CancellationToken,
}

impl RetentionActor {
    pub fn new(
        store: Arc<TelemetryStore>,
        alerts: Arc<AlertStore>,
        settings: RetentionSettings,
        command_rx: mpsc::Receiver<RetentionCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            alerts,
            settings,
            command_rx,
            cancel,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting retention actor (every {:?})", self.settings.interval);

        let mut ticker = time::interval_at(
            Instant::now() + self.settings.interval,
            self.settings.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                _ = ticker.tick() => {
                    self.prune();
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        RetentionCommand::PruneNow { respond_to } => {
                            let _ = respond_to.send(self.prune());
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("retention actor stopped");
    }

    fn prune(&self) -> RetentionReport {
        let now = self.store.now();
        let report = RetentionReport {
            samples: self.store.prune_before(now - self.settings.memory_window),
            alerts: self
                .alerts
                .prune_resolved_before(now - self.settings.alert_history),
        };

        if report.samples.total() > 0 || report.alerts > 0 {
            info!(
                "pruned {} sample(s) and {} resolved alert(s) from memory",
                report.samples.total(),
                report.alerts
            );
        }
        report
    }
}

/// Handle for controlling the RetentionActor
#[derive(Clone)]
pub struct RetentionHandle {
    sender: mpsc::Sender<RetentionCommand>,
}

impl RetentionHandle {
    pub fn spawn(
        store: Arc<TelemetryStore>,
        alerts: Arc<AlertStore>,
        settings: RetentionSettings,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = RetentionActor::new(store, alerts, settings, cmd_rx, cancel);
        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    pub async fn prune_now(&self) -> PipelineResult<RetentionReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RetentionCommand::PruneNow { respond_to: tx })
            .await
            .map_err(|_| PipelineError::NotRunning("retention"))?;

        rx.await.map_err(|_| PipelineError::NotRunning("retention"))
    }
}
