//! # Event Dispatcher
//!
//! Drains the transactional outbox and drives the handler pipeline.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        Dispatcher loop                               │
//! │                                                                      │
//! │   wake on: poll interval │ nudge after commit │ shutdown             │
//! │                                                                      │
//! │   each pass:                                                         │
//! │     1. fan out      pending events → one job per interested handler  │
//! │     2. execute      due jobs, outside any open transaction           │
//! │     3. record       completion + follow-up events in one commit      │
//! │                                                                      │
//! │   passes repeat until a pass finds nothing, so an event chain        │
//! │   (order.created → invoice.document_ready → notification) clears     │
//! │   within a single wake.                                              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Handling
//! A failing job stays pending with its attempt count and last error
//! recorded, and is retried on following passes until it burns through
//! the configured attempts, then parks as failed for operator review.
//! One bad job never blocks the others.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use saldo_db::{Database, OutboxRepository};

use crate::config::{DispatcherSettings, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::handlers::EventHandler;

// =============================================================================
// Handle
// =============================================================================

/// Cheap clonable control surface for a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    nudge_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl DispatcherHandle {
    /// Wakes the dispatcher. Nudges coalesce: while one is already
    /// queued, further nudges are dropped, and the next pass picks up
    /// everything committed so far.
    pub fn nudge(&self) {
        let _ = self.nudge_tx.try_send(());
    }

    /// Asks the dispatcher to stop after its current pass.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelClosed("dispatcher already stopped".to_string()))
    }
}

// =============================================================================
// Stats
// =============================================================================

/// What one pass (or one full drain) did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events expanded into handler jobs.
    pub fanned_out: usize,
    /// Jobs that completed.
    pub completed: usize,
    /// Job attempts that failed.
    pub failed: usize,
}

impl DispatchStats {
    fn absorb(&mut self, other: DispatchStats) {
        self.fanned_out += other.fanned_out;
        self.completed += other.completed;
        self.failed += other.failed;
    }

    fn is_quiet(&self) -> bool {
        self.fanned_out == 0 && self.completed == 0 && self.failed == 0
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Outbox pump: owns the receive side of its control channels and runs
/// until shut down.
pub struct EventDispatcher {
    db: Database,
    settings: DispatcherSettings,
    handlers: Vec<Arc<dyn EventHandler>>,
    nudge_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl EventDispatcher {
    /// Builds a dispatcher and its control handle.
    pub fn new(
        db: Database,
        config: &EngineConfig,
        handlers: Vec<Arc<dyn EventHandler>>,
    ) -> (Self, DispatcherHandle) {
        let (nudge_tx, nudge_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let dispatcher = EventDispatcher {
            db,
            settings: config.dispatcher,
            handlers,
            nudge_rx,
            shutdown_rx,
        };
        let handle = DispatcherHandle {
            nudge_tx,
            shutdown_tx,
        };
        (dispatcher, handle)
    }

    /// Runs until shutdown. Spawn this on the runtime:
    ///
    /// ```ignore
    /// let (dispatcher, handle) = EventDispatcher::new(db, &config, default_handlers());
    /// tokio::spawn(dispatcher.run());
    /// ```
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            handlers = self.handlers.len(),
            poll_interval_secs = self.settings.poll_interval_secs,
            "Event dispatcher started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.drain().await;
                    self.log_queue_depth().await;
                }
                Some(_) = self.nudge_rx.recv() => {
                    self.drain().await;
                }
                // A closed channel means every handle is gone; nobody
                // can nudge or stop the loop anymore, so wind down
                _ = self.shutdown_rx.recv() => {
                    info!("Event dispatcher stopped");
                    return;
                }
            }
        }
    }

    /// Stats line for each poll cycle: queue depths after draining.
    async fn log_queue_depth(&self) {
        match self.db.outbox().counts().await {
            Ok(counts) => debug!(
                undispatched_events = counts.undispatched_events,
                pending_jobs = counts.pending_jobs,
                failed_jobs = counts.failed_jobs,
                "Outbox queue depth"
            ),
            Err(err) => warn!(error = %err, "Could not read outbox queue depth"),
        }
    }

    /// Repeats passes until one finds nothing to do, so follow-up events
    /// emitted mid-drain are processed before going back to sleep.
    async fn drain(&self) -> DispatchStats {
        let mut total = DispatchStats::default();
        loop {
            match self.process_pending().await {
                Ok(stats) => {
                    total.absorb(stats);
                    if stats.is_quiet() {
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "Outbox pass failed");
                    break;
                }
            }
        }
        if !total.is_quiet() {
            debug!(
                fanned_out = total.fanned_out,
                completed = total.completed,
                failed = total.failed,
                "Outbox drained"
            );
        }
        total
    }

    /// One pass: fan new events out into jobs, then run due jobs.
    ///
    /// Handlers run with no transaction open; each opens its own if it
    /// writes. Completion and follow-up enqueue share one commit, so a
    /// follow-up is published exactly when its parent job completes.
    async fn process_pending(&self) -> EngineResult<DispatchStats> {
        let mut stats = DispatchStats::default();

        let events = self
            .db
            .outbox()
            .pending_events(self.settings.batch_size)
            .await?;
        for event in &events {
            let interested: Vec<&str> = self
                .handlers
                .iter()
                .filter(|h| h.interested_in(&event.event_type))
                .map(|h| h.name())
                .collect();
            let mut uow = self.db.begin().await?;
            OutboxRepository::ensure_jobs(uow.conn(), &event.id, &interested).await?;
            OutboxRepository::mark_dispatched(uow.conn(), &event.id).await?;
            uow.commit().await?;
            debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                jobs = interested.len(),
                "Event fanned out"
            );
            stats.fanned_out += 1;
        }

        let jobs = self
            .db
            .outbox()
            .pending_jobs(self.settings.handler_max_attempts, self.settings.batch_size)
            .await?;
        for job in &jobs {
            let Some(event) = self.db.outbox().load_event(&job.event_id).await? else {
                self.park_job(&job.id, "event payload missing").await?;
                stats.failed += 1;
                continue;
            };
            let Some(handler) = self.handlers.iter().find(|h| h.name() == job.handler) else {
                self.park_job(&job.id, "no such handler").await?;
                stats.failed += 1;
                continue;
            };

            match handler.handle(&self.db, &event).await {
                Ok(follow_ups) => {
                    let mut uow = self.db.begin().await?;
                    OutboxRepository::mark_job_completed(uow.conn(), &job.id).await?;
                    for follow_up in &follow_ups {
                        OutboxRepository::enqueue(uow.conn(), follow_up).await?;
                    }
                    uow.commit().await?;
                    stats.completed += 1;
                }
                Err(err) => {
                    warn!(
                        job_id = %job.id,
                        handler = %job.handler,
                        attempt = job.attempts + 1,
                        error = %err,
                        "Event handler failed"
                    );
                    let mut uow = self.db.begin().await?;
                    OutboxRepository::mark_job_failed(
                        uow.conn(),
                        &job.id,
                        &err.to_string(),
                        self.settings.handler_max_attempts,
                    )
                    .await?;
                    uow.commit().await?;
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Parks a job that can never succeed, skipping the retry budget.
    async fn park_job(&self, job_id: &str, reason: &str) -> EngineResult<()> {
        error!(job_id = %job_id, reason, "Parking unprocessable job");
        let mut uow = self.db.begin().await?;
        OutboxRepository::mark_job_failed(uow.conn(), job_id, reason, 0).await?;
        uow.commit().await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
