//! EvaluatorActor - Runs the rule engine on a timer
//!
//! Each tick evaluates only the entities that received metrics since the
//! previous pass. New alerts go straight to the dispatcher's queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::dispatcher::DispatchHandle;
use super::messages::{EvaluationReport, EvaluatorCommand};
use crate::error::{PipelineError, PipelineResult};
use crate::rules::RuleEngine;
use crate::store::TelemetryStore;

pub struct EvaluatorActor {
    store: Arc<TelemetryStore>,
    engine: Arc<RuleEngine>,
    dispatcher: DispatchHandle,
    interval: Duration,
    command_rx: mpsc::Receiver<EvaluatorCommand>,
    cancel: CancellationToken,
}

impl EvaluatorActor {
    pub fn new(
        store: Arc<TelemetryStore>,
        engine: Arc<RuleEngine>,
        dispatcher: DispatchHandle,
        interval: Duration,
        command_rx: mpsc::Receiver<EvaluatorCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            engine,
            dispatcher,
            interval,
            command_rx,
            cancel,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting evaluator (every {:?})", self.interval);

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("evaluator cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    let pending = self.store.aggregator().take_pending();
                    if !pending.is_empty() {
                        self.evaluate(pending).await;
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        EvaluatorCommand::EvaluateNow { respond_to } => {
                            // a full pass covers everything that was pending
                            self.store.aggregator().take_pending();
                            let entities = self.store.aggregator().entities();
                            let report = self.evaluate(entities).await;
                            let _ = respond_to.send(report);
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("evaluator stopped");
    }

    async fn evaluate(&self, entities: Vec<String>) -> EvaluationReport {
        let now = self.store.now();
        let mut report = EvaluationReport::default();
        let mut fired = Vec::new();

        for entity_id in entities {
            let values = self.store.aggregator().latest_values(&entity_id);
            if values.is_empty() {
                continue;
            }

            let label = self.store.label(&entity_id);
            let evaluation = self.engine.evaluate(&entity_id, &label, &values, now);

            report.entities += 1;
            report.alerts_created += evaluation.alerts.len();
            report.suppressed += evaluation.suppressed;
            report.rule_errors += evaluation.errors.len();
            fired.extend(evaluation.alerts);
        }

        trace!(
            "evaluated {} entities, {} new alert(s)",
            report.entities,
            report.alerts_created
        );

        if !fired.is_empty() {
            if let Err(e) = self.dispatcher.enqueue(fired).await {
                warn!("could not queue alerts for delivery: {}", e);
            }
        }

        report
    }
}

/// Handle for controlling the EvaluatorActor
#[derive(Clone)]
pub struct EvaluatorHandle {
    sender: mpsc::Sender<EvaluatorCommand>,
}

impl EvaluatorHandle {
    pub fn spawn(
        store: Arc<TelemetryStore>,
        engine: Arc<RuleEngine>,
        dispatcher: DispatchHandle,
        interval: Duration,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = EvaluatorActor::new(store, engine, dispatcher, interval, cmd_rx, cancel);
        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    /// Evaluate every known entity right away
    pub async fn evaluate_now(&self) -> PipelineResult<EvaluationReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EvaluatorCommand::EvaluateNow { respond_to: tx })
            .await
            .map_err(|_| PipelineError::NotRunning("evaluator"))?;

        rx.await.map_err(|_| PipelineError::NotRunning("evaluator"))
    }
}
