//! PollerActor - Polls the whole fleet on a timer
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → FleetPoller::poll_all → Publish PollEvent → [AlertActor, StorageActor, ...]
//!     ↑
//!     └─── Commands (PollNow, UpdateInterval, UpdateEquipment, Shutdown)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::Equipment;
use crate::poller::{EquipmentStatus, FleetPoller};

use super::messages::{PollEvent, PollerCommand};

/// How often expired cache entries are dropped
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Actor driving periodic fleet polls
pub struct PollerActor {
    poller: Arc<FleetPoller>,

    equipment: Vec<Equipment>,

    command_rx: mpsc::Receiver<PollerCommand>,

    /// Broadcast sender for completed cycles
    event_tx: broadcast::Sender<PollEvent>,

    interval_duration: Duration,
}

impl PollerActor {
    pub fn new(
        poller: Arc<FleetPoller>,
        equipment: Vec<Equipment>,
        interval_duration: Duration,
        command_rx: mpsc::Receiver<PollerCommand>,
        event_tx: broadcast::Sender<PollEvent>,
    ) -> Self {
        Self {
            poller,
            equipment,
            command_rx,
            event_tx,
            interval_duration,
        }
    }

    /// Run until a Shutdown command arrives or every handle is dropped
    #[instrument(skip(self), fields(equipment = self.equipment.len()))]
    pub async fn run(mut self) {
        debug!("starting poller actor");

        let mut ticker = self.ticker();
        let mut purge = interval(CACHE_PURGE_INTERVAL);
        purge.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // skip the immediate first tick, the caches start empty
        purge.reset();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_cycle().await;
                }

                _ = purge.tick() => {
                    let remaining = self.poller.purge_caches();
                    trace!(remaining, "cache purge");
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        PollerCommand::PollNow { respond_to } => {
                            debug!("received PollNow command");
                            let statuses = self.poll_cycle().await;
                            let _ = respond_to.send(statuses);
                        }

                        PollerCommand::UpdateInterval { interval_secs } => {
                            debug!("updating interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs.max(1));
                            ticker = self.ticker();
                        }

                        PollerCommand::UpdateEquipment { equipment } => {
                            info!("equipment list updated ({} item(s))", equipment.len());
                            self.equipment = equipment;
                        }

                        PollerCommand::Shutdown => {
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

        debug!("poller actor stopped");
    }

    fn ticker(&self) -> tokio::time::Interval {
        let mut ticker = interval(self.interval_duration);
        // a slow cycle pushes the next one back instead of bursting
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Poll every equipment once and publish the cycle
    async fn poll_cycle(&self) -> Vec<EquipmentStatus> {
        let started_at = Utc::now();
        let mut statuses = self.poller.poll_all(&self.equipment).await;
        statuses.sort_by_key(|status| status.id);

        let event = PollEvent {
            statuses: statuses.clone(),
            started_at,
            completed_at: Utc::now(),
        };
        debug!(
            online = event.online_count(),
            total = event.statuses.len(),
            "poll cycle complete"
        );

        // no subscribers is not an error
        if self.event_tx.send(event).is_err() {
            trace!("no subscribers for poll event");
        }

        statuses
    }
}

/// Handle for controlling a PollerActor
#[derive(Clone)]
pub struct PollerHandle {
    sender: mpsc::Sender<PollerCommand>,
}

impl PollerHandle {
    /// Spawn a poller actor and return a handle to it
    pub fn spawn(
        poller: Arc<FleetPoller>,
        equipment: Vec<Equipment>,
        interval_duration: Duration,
        event_tx: broadcast::Sender<PollEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = PollerActor::new(poller, equipment, interval_duration, cmd_rx, event_tx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Poll the fleet now and wait for the statuses
    pub async fn poll_now(&self) -> Result<Vec<EquipmentStatus>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PollerCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive PollNow response")
    }

    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(PollerCommand::UpdateInterval { interval_secs })
            .await
            .context("failed to send UpdateInterval command")
    }

    pub async fn update_equipment(&self, equipment: Vec<Equipment>) -> Result<()> {
        self.sender
            .send(PollerCommand::UpdateEquipment { equipment })
            .await
            .context("failed to send UpdateEquipment command")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(PollerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
