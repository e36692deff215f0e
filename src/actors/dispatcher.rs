//! DispatcherActor - Delivers alerts to their notification channels
//!
//! ## Queue
//!
//! New alerts are pushed into a priority queue owned by this actor: higher
//! severity first, and FIFO among alerts of the same severity. The queue is
//! drained every `dispatch_interval` (or on `DispatchNow`).
//!
//! ## Delivery
//!
//! Each alert is sent to all of its channels concurrently. Every send is
//! bounded by `send_timeout`. Delivery is at-most-once: a failed or timed
//! out send is logged and counted, never retried, and the alert stays active.
//! An alert that was resolved while it sat in the queue is dropped unsent.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::messages::{DispatchCommand, DispatchStats};
use crate::alerts::{Alert, AlertStore};
use crate::channels::{Channel, ChannelRegistry, DeliveryError};
use crate::error::{PipelineError, PipelineResult};

/// Queue entry; `seq` keeps same-severity alerts in arrival order
#[derive(Debug)]
struct QueuedAlert {
    seq: u64,
    alert: Alert,
}

impl PartialEq for QueuedAlert {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedAlert {}

impl PartialOrd for QueuedAlert {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedAlert {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest: highest severity, then lowest seq
        self.alert
            .severity
            .cmp(&other.alert.severity)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub dispatch_interval: Duration,
    pub send_timeout: Duration,
}

pub struct DispatcherActor {
    registry: Arc<ChannelRegistry>,
    alerts: Arc<AlertStore>,
    settings: DispatchSettings,
    queue: BinaryHeap<QueuedAlert>,
    next_seq: u64,
    command_rx: mpsc::Receiver<DispatchCommand>,
    cancel: CancellationToken,
    stats: DispatchStats,
}

impl DispatcherActor {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        alerts: Arc<AlertStore>,
        settings: DispatchSettings,
        command_rx: mpsc::Receiver<DispatchCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            alerts,
            settings,
            queue: BinaryHeap::new(),
            next_seq: 0,
            command_rx,
            cancel,
            stats: DispatchStats::default(),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting dispatcher (channels: {:?})",
            self.registry.channels()
        );

        let mut dispatch_interval = time::interval_at(
            Instant::now() + self.settings.dispatch_interval,
            self.settings.dispatch_interval,
        );
        dispatch_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("dispatcher cancelled");
                    break;
                }

                _ = dispatch_interval.tick() => {
                    if !self.queue.is_empty() {
                        self.dispatch_all().await;
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd).await;
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        // Pick up anything the evaluator managed to send before cancellation
        while let Ok(cmd) = self.command_rx.try_recv() {
            if let DispatchCommand::Enqueue { alerts } = cmd {
                self.enqueue(alerts);
            }
        }

        if !self.queue.is_empty() {
            info!("draining {} queued alert(s) before shutdown", self.queue.len());
            self.dispatch_all().await;
        }

        debug!("dispatcher stopped");
    }

    async fn handle_command(&mut self, cmd: DispatchCommand) {
        match cmd {
            DispatchCommand::Enqueue { alerts } => self.enqueue(alerts),

            DispatchCommand::DispatchNow { respond_to } => {
                let handled = self.dispatch_all().await;
                let _ = respond_to.send(handled);
            }

            DispatchCommand::GetStats { respond_to } => {
                let mut stats = self.stats.clone();
                stats.queued = self.queue.len();
                let _ = respond_to.send(stats);
            }
        }
    }

    fn enqueue(&mut self, alerts: Vec<Alert>) {
        for alert in alerts {
            trace!(alert_id = alert.id, severity = %alert.severity, "alert queued");
            self.queue.push(QueuedAlert {
                seq: self.next_seq,
                alert,
            });
            self.next_seq += 1;
        }
    }

    /// Deliver queued alerts in priority order; returns how many were taken off the queue
    async fn dispatch_all(&mut self) -> usize {
        let mut handled = 0;
        while let Some(QueuedAlert { alert, .. }) = self.queue.pop() {
            self.dispatch(alert).await;
            handled += 1;
        }
        handled
    }

    #[instrument(skip_all, fields(alert_id = alert.id, severity = %alert.severity))]
    async fn dispatch(&mut self, alert: Alert) {
        if !self.alerts.is_active(alert.id) {
            debug!("alert resolved before delivery, skipping");
            self.stats.skipped_resolved += 1;
            return;
        }

        let send_timeout = self.settings.send_timeout;
        let sends = alert.channels.iter().map(|&channel| {
            let adapter = self.registry.get(channel);
            let alert = &alert;
            async move {
                let result = match adapter {
                    Some(adapter) => match time::timeout(send_timeout, adapter.send(alert)).await {
                        Ok(result) => result,
                        Err(_) => Err(DeliveryError::Timeout(send_timeout)),
                    },
                    None => Err(DeliveryError::NotConfigured(channel)),
                };
                (channel, result)
            }
        });

        let results: Vec<(Channel, Result<(), DeliveryError>)> = join_all(sends).await;

        for (channel, result) in results {
            let stats = self.stats.channels.entry(channel).or_default();
            match result {
                Ok(()) => {
                    stats.delivered += 1;
                    trace!(%channel, "alert delivered");
                }
                Err(e) => {
                    stats.failed += 1;
                    if matches!(e, DeliveryError::Timeout(_)) {
                        stats.timeouts += 1;
                    }
                    let err = PipelineError::Dispatch {
                        channel,
                        reason: e.to_string(),
                    };
                    warn!("{}", err);
                }
            }
        }

        self.stats.dispatched += 1;
    }
}

/// Handle for controlling the DispatcherActor
#[derive(Clone)]
pub struct DispatchHandle {
    sender: mpsc::Sender<DispatchCommand>,
}

impl DispatchHandle {
    pub fn spawn(
        registry: Arc<ChannelRegistry>,
        alerts: Arc<AlertStore>,
        settings: DispatchSettings,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = DispatcherActor::new(registry, alerts, settings, cmd_rx, cancel);
        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    /// Queue alerts for delivery on the next dispatch tick
    pub async fn enqueue(&self, alerts: Vec<Alert>) -> PipelineResult<()> {
        self.sender
            .send(DispatchCommand::Enqueue { alerts })
            .await
            .map_err(|_| PipelineError::NotRunning("dispatcher"))
    }

    /// Deliver everything queued without waiting for the next tick
    pub async fn dispatch_now(&self) -> PipelineResult<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::DispatchNow { respond_to: tx })
            .await
            .map_err(|_| PipelineError::NotRunning("dispatcher"))?;

        rx.await.map_err(|_| PipelineError::NotRunning("dispatcher"))
    }

    pub async fn get_stats(&self) -> PipelineResult<DispatchStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::GetStats { respond_to: tx })
            .await
            .map_err(|_| PipelineError::NotRunning("dispatcher"))?;

        rx.await.map_err(|_| PipelineError::NotRunning("dispatcher"))
    }
}
