//! AlertActor - Evaluates poll cycles and drives notifications
//!
//! ```text
//! PollEvent → AlertEngine::evaluate_statuses → AlertStore::append_alert
//!                                                    ↓
//!                              retry timer → NotificationBatcher::try_send
//! ```
//!
//! The engine is stateless, so every cycle appends one alert per satisfied
//! rule. Deduplication happens on delivery: the batcher only ever sends alerts
//! that are still pending and marks them once delivery is confirmed. The retry
//! timer re-attempts failed or throttled deliveries without waiting for a new
//! alert.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::alerts::AlertEngine;
use crate::notify::{DeliveryReport, NotificationBatcher, RejectReason, SendOutcome};
use crate::storage::{AlertStats, AlertStore};

use super::messages::{AlertCommand, PollEvent};

pub struct AlertActor {
    engine: AlertEngine,

    store: Arc<dyn AlertStore>,

    batcher: Arc<NotificationBatcher>,

    command_rx: mpsc::Receiver<AlertCommand>,

    event_rx: broadcast::Receiver<PollEvent>,

    /// How often pending alerts are re-offered to the batcher
    retry_interval: Duration,

    /// Deadline of a timed mute
    unmute_at: Option<Instant>,
}

impl AlertActor {
    pub fn new(
        engine: AlertEngine,
        store: Arc<dyn AlertStore>,
        batcher: Arc<NotificationBatcher>,
        command_rx: mpsc::Receiver<AlertCommand>,
        event_rx: broadcast::Receiver<PollEvent>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            batcher,
            command_rx,
            event_rx,
            retry_interval: retry_interval.max(Duration::from_secs(1)),
            unmute_at: None,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert actor");

        let mut retry = interval(self.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // skip the immediate first tick; the first cycle triggers a send anyway
        retry.reset();

        loop {
            let unmute_at = self.unmute_at;

            tokio::select! {
                result = self.event_rx.recv() => {
                    match result {
                        Ok(event) => {
                            self.handle_poll_event(event).await;
                            self.attempt_send().await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("alert actor lagged, skipped {skipped} poll cycles");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("poll event channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = retry.tick() => {
                    trace!("notification retry tick");
                    self.attempt_send().await;
                }

                _ = sleep_until(unmute_at.unwrap_or_else(Instant::now)), if unmute_at.is_some() => {
                    info!("mute window elapsed, notifications resumed");
                    self.unmute_at = None;
                    self.batcher.set_muted(false);
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        AlertCommand::TrySend { respond_to } => {
                            let outcome = self.batcher.try_send().await;
                            let _ = respond_to.send(outcome);
                        }

                        AlertCommand::Mute { duration } => {
                            match duration {
                                Some(duration) => {
                                    debug!("muting notifications for {duration:?}");
                                    self.unmute_at = Some(Instant::now() + duration);
                                }
                                None => {
                                    debug!("muting notifications until unmuted");
                                    self.unmute_at = None;
                                }
                            }
                            self.batcher.set_muted(true);
                        }

                        AlertCommand::Unmute => {
                            debug!("unmuting notifications");
                            self.unmute_at = None;
                            self.batcher.set_muted(false);
                        }

                        AlertCommand::SendTest { respond_to } => {
                            let report = self.batcher.send_test().await;
                            let _ = respond_to.send(report);
                        }

                        AlertCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.store.alert_stats().await);
                        }

                        AlertCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("alert actor stopped");
    }

    /// Evaluate one cycle and persist what it raised
    #[instrument(skip_all, fields(statuses = event.statuses.len()))]
    async fn handle_poll_event(&self, event: PollEvent) {
        let raised = self.engine.evaluate_statuses(&event.statuses);
        if raised.is_empty() {
            trace!("no alert raised");
            return;
        }

        let now = Utc::now();
        for alert in raised {
            let message = alert.message.clone();
            match self.store.append_alert(alert, now).await {
                Ok(stored) => debug!(id = stored.id, level = %stored.level, "{}", stored.message),
                Err(e) => error!("failed to store alert \"{message}\": {e}"),
            }
        }
    }

    async fn attempt_send(&self) {
        match self.batcher.try_send().await {
            SendOutcome::Accepted(summary) => {
                debug!(groups = summary.groups, alerts = summary.alerts, "pending alerts delivered");
            }
            SendOutcome::Rejected(RejectReason::NoPending | RejectReason::Disabled) => {}
            SendOutcome::Rejected(reason) => trace!("notification not sent: {reason}"),
        }
    }
}

/// Handle for controlling the AlertActor
#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<AlertCommand>,
}

impl AlertHandle {
    /// Spawn an alert actor
    ///
    /// `retry_interval` is usually the notification interval, so a throttled
    /// batch goes out as soon as the window reopens.
    pub fn spawn(
        engine: AlertEngine,
        store: Arc<dyn AlertStore>,
        batcher: Arc<NotificationBatcher>,
        event_rx: broadcast::Receiver<PollEvent>,
        retry_interval: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = AlertActor::new(engine, store, batcher, cmd_rx, event_rx, retry_interval);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Offer the pending alerts to the batcher now
    pub async fn try_send(&self) -> Result<SendOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::TrySend { respond_to: tx })
            .await
            .context("failed to send TrySend command")?;

        rx.await.context("failed to receive TrySend response")
    }

    /// Mute notifications, for `duration` or until [`AlertHandle::unmute`]
    pub async fn mute(&self, duration: Option<Duration>) -> Result<()> {
        self.sender
            .send(AlertCommand::Mute { duration })
            .await
            .context("failed to send Mute command")
    }

    pub async fn unmute(&self) -> Result<()> {
        self.sender
            .send(AlertCommand::Unmute)
            .await
            .context("failed to send Unmute command")
    }

    pub async fn send_test(&self) -> Result<DeliveryReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::SendTest { respond_to: tx })
            .await
            .context("failed to send SendTest command")?;

        rx.await.context("failed to receive SendTest response")
    }

    pub async fn get_stats(&self) -> Result<AlertStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        Ok(rx.await.context("failed to receive GetStats response")??)
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(AlertCommand::Shutdown).await;
    }
}
