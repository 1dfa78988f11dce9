//! Message types for actor communication
//!
//! 1. **Commands**: request/response messages sent to one actor via mpsc
//! 2. **Events**: broadcast notifications published to every subscriber

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::config::Equipment;
use crate::notify::{DeliveryReport, SendOutcome};
use crate::poller::EquipmentStatus;
use crate::storage::{AlertStats, ChartSeries, MetricSample, StorageResult};

/// Published once per completed fleet poll
///
/// Subscribers that lag lose whole cycles, never half of one.
#[derive(Debug, Clone)]
pub struct PollEvent {
    /// One status per polled equipment, sorted by equipment id
    pub statuses: Vec<EquipmentStatus>,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,
}

impl PollEvent {
    pub fn online_count(&self) -> usize {
        self.statuses.iter().filter(|status| status.is_online()).count()
    }
}

/// Commands that can be sent to the PollerActor
#[derive(Debug)]
pub enum PollerCommand {
    /// Poll the whole fleet now, bypassing the timer
    PollNow {
        respond_to: oneshot::Sender<Vec<EquipmentStatus>>,
    },

    /// Update the polling interval
    UpdateInterval { interval_secs: u64 },

    /// Replace the polled equipment list
    UpdateEquipment { equipment: Vec<Equipment> },

    /// Gracefully shut down the poller
    ///
    /// A poll in flight finishes first.
    Shutdown,
}

/// Commands that can be sent to the AlertActor
#[derive(Debug)]
pub enum AlertCommand {
    /// Attempt a grouped notification now
    TrySend {
        respond_to: oneshot::Sender<SendOutcome>,
    },

    /// Suppress deliveries; alerts keep accumulating
    ///
    /// `None` mutes until an explicit unmute.
    Mute { duration: Option<Duration> },

    Unmute,

    /// Send a single test notification through the configured channel
    SendTest {
        respond_to: oneshot::Sender<DeliveryReport>,
    },

    GetStats {
        respond_to: oneshot::Sender<StorageResult<AlertStats>>,
    },

    /// Gracefully shut down the alert actor
    Shutdown,
}

/// Commands that can be sent to the StorageActor
#[derive(Debug)]
pub enum StorageCommand {
    /// Latest samples for one equipment, oldest first
    QueryLatest {
        equipment_id: u64,
        limit: usize,
        respond_to: oneshot::Sender<StorageResult<Vec<MetricSample>>>,
    },

    /// Chart series covering the last `hours` hours
    QueryWindow {
        equipment_id: u64,
        hours: u32,
        respond_to: oneshot::Sender<StorageResult<ChartSeries>>,
    },

    /// Run the retention cleanup now
    Cleanup {
        respond_to: oneshot::Sender<StorageResult<u64>>,
    },

    GetStats {
        respond_to: oneshot::Sender<StorageStats>,
    },

    /// Gracefully shut down the storage actor
    Shutdown,
}

/// Storage actor counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Samples appended since start
    pub samples_written: u64,

    /// Appends that failed since start
    pub write_failures: u64,

    /// Poll cycles received
    pub cycles_seen: u64,

    pub last_cleanup_time: Option<DateTime<Utc>>,

    pub total_samples_deleted: u64,
}
