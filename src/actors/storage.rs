//! StorageActor - Persists poll results
//!
//! Every online status of a [`PollEvent`] becomes one [`MetricSample`]. The
//! backend caps each equipment's history, so the actor only has to run the
//! optional age-based retention cleanup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::storage::{ChartSeries, MetricSample, MetricsStore, StorageResult};

use super::messages::{PollEvent, StorageCommand, StorageStats};

/// Run retention cleanup daily
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct StorageActor {
    store: Arc<dyn MetricsStore>,

    command_rx: mpsc::Receiver<StorageCommand>,

    event_rx: broadcast::Receiver<PollEvent>,

    /// Samples older than this many days are deleted; `None` keeps them
    retention_days: Option<u32>,

    stats: StorageStats,
}

impl StorageActor {
    pub fn new(
        store: Arc<dyn MetricsStore>,
        command_rx: mpsc::Receiver<StorageCommand>,
        event_rx: broadcast::Receiver<PollEvent>,
        retention_days: Option<u32>,
    ) -> Self {
        if let Some(days) = retention_days {
            debug!("retention cleanup enabled: {} days", days);
        }

        Self {
            store,
            command_rx,
            event_rx,
            retention_days,
            stats: StorageStats::default(),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting storage actor");

        let has_retention = self.retention_days.is_some();
        let mut cleanup_interval = time::interval(CLEANUP_INTERVAL);

        loop {
            tokio::select! {
                result = self.event_rx.recv() => {
                    match result {
                        Ok(event) => self.store_cycle(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("storage actor lagged, skipped {skipped} poll cycles");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("poll event channel closed, shutting down");
                            break;
                        }
                    }
                }

                // the first tick fires immediately, so cleanup also runs on startup
                _ = cleanup_interval.tick(), if has_retention => {
                    debug!("daily retention cleanup triggered");
                    if let Err(e) = self.run_cleanup().await {
                        error!("retention cleanup failed: {e}");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("storage actor stopped");
    }

    async fn store_cycle(&mut self, event: PollEvent) {
        self.stats.cycles_seen += 1;

        for status in event.statuses {
            let Some(metrics) = status.metrics else {
                continue;
            };
            trace!("storing sample for {} at {}", status.name, metrics.collected_at());

            let sample = MetricSample::from_metrics(status.id, metrics);
            match self.store.append(sample).await {
                Ok(()) => self.stats.samples_written += 1,
                Err(e) => {
                    // one failed write must not stop the rest of the cycle
                    self.stats.write_failures += 1;
                    error!("failed to store sample for {}: {}", status.name, e);
                }
            }
        }
    }

    /// Delete samples older than the retention window
    async fn run_cleanup(&mut self) -> StorageResult<u64> {
        let Some(retention_days) = self.retention_days else {
            return Ok(0);
        };

        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        debug!("running retention cleanup (deleting data before {})", cutoff);

        let deleted = self.store.cleanup_older_than(cutoff).await? as u64;
        self.stats.last_cleanup_time = Some(Utc::now());
        self.stats.total_samples_deleted += deleted;

        if deleted > 0 {
            info!("retention cleanup complete: deleted {} old samples", deleted);
        } else {
            trace!("retention cleanup: no old samples to delete");
        }
        Ok(deleted)
    }

    /// Returns false once the actor should stop
    async fn handle_command(&mut self, cmd: StorageCommand) -> bool {
        match cmd {
            StorageCommand::QueryLatest {
                equipment_id,
                limit,
                respond_to,
            } => {
                let result = self.store.latest(equipment_id, limit).await;
                let _ = respond_to.send(result);
            }

            StorageCommand::QueryWindow {
                equipment_id,
                hours,
                respond_to,
            } => {
                let result = self.store.query_window(equipment_id, hours).await;
                let _ = respond_to.send(result);
            }

            StorageCommand::Cleanup { respond_to } => {
                debug!("manual cleanup requested");
                let result = self.run_cleanup().await;
                let _ = respond_to.send(result);
            }

            StorageCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats.clone());
            }

            StorageCommand::Shutdown => {
                debug!("received shutdown command");
                return false;
            }
        }
        true
    }
}

/// Handle for controlling the StorageActor
#[derive(Clone)]
pub struct StorageHandle {
    sender: mpsc::Sender<StorageCommand>,
}

impl StorageHandle {
    pub fn spawn(
        store: Arc<dyn MetricsStore>,
        event_rx: broadcast::Receiver<PollEvent>,
        retention_days: Option<u32>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = StorageActor::new(store, cmd_rx, event_rx, retention_days);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Latest `limit` samples of one equipment, oldest first
    pub async fn query_latest(&self, equipment_id: u64, limit: usize) -> Result<Vec<MetricSample>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::QueryLatest {
                equipment_id,
                limit,
                respond_to: tx,
            })
            .await
            .context("failed to send QueryLatest command")?;

        Ok(rx.await.context("failed to receive QueryLatest response")??)
    }

    /// Chart-ready series over the last `hours` hours
    pub async fn query_window(&self, equipment_id: u64, hours: u32) -> Result<ChartSeries> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::QueryWindow {
                equipment_id,
                hours,
                respond_to: tx,
            })
            .await
            .context("failed to send QueryWindow command")?;

        Ok(rx.await.context("failed to receive QueryWindow response")??)
    }

    /// Run the retention cleanup now and return the deleted count
    pub async fn cleanup(&self) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::Cleanup { respond_to: tx })
            .await
            .context("failed to send Cleanup command")?;

        Ok(rx.await.context("failed to receive Cleanup response")??)
    }

    pub async fn get_stats(&self) -> Option<StorageStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    pub async fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        self.get_stats().await?.last_cleanup_time
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(StorageCommand::Shutdown).await;
    }
}
