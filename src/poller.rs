//! Fleet polling
//!
//! One task per equipment, at most `max_workers` in flight. Each task opens
//! its own session and walks a small retry state machine:
//!
//! ```text
//! Attempt1 ──ok──> Online
//!    │ fail (sleep backoff)
//!    ▼
//! Attempt2 ──ok──> Online
//!    │ fail
//!    ▼
//! Offline
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, trace, warn};

use crate::cache::{CacheKey, CacheKind, MetricCache};
use crate::collectors::{CollectError, Collectors};
use crate::config::{Config, Equipment, EquipmentKind, PollingConfig, SnmpConfig};
use crate::snmp::{Session, SessionFactory, oids};
use crate::{DeviceMetrics, InterfaceTraffic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// Result of polling one equipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentStatus {
    pub id: u64,
    pub name: String,
    pub ip: String,
    #[serde(rename = "type")]
    pub kind: EquipmentKind,
    pub status: DeviceStatus,

    /// Time of the latest successful poll, if any
    pub last_seen: Option<DateTime<Utc>>,

    pub metrics: Option<DeviceMetrics>,
    pub error: Option<String>,
}

impl EquipmentStatus {
    pub fn online(equipment: &Equipment, metrics: DeviceMetrics, last_seen: DateTime<Utc>) -> Self {
        Self {
            id: equipment.id,
            name: equipment.name.clone(),
            ip: equipment.ip.clone(),
            kind: equipment.kind,
            status: DeviceStatus::Online,
            last_seen: Some(last_seen),
            metrics: Some(metrics),
            error: None,
        }
    }

    pub fn offline(equipment: &Equipment, error: String, last_seen: Option<DateTime<Utc>>) -> Self {
        Self {
            id: equipment.id,
            name: equipment.name.clone(),
            ip: equipment.ip.clone(),
            kind: equipment.kind,
            status: DeviceStatus::Offline,
            last_seen,
            metrics: None,
            error: Some(error),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }
}

/// Answer of a single sysDescr read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityReport {
    pub online: bool,
    pub description: Option<String>,
    pub error: Option<String>,
}

enum RetryState {
    Attempt1,
    Attempt2,
    Online(DeviceMetrics),
    Offline(CollectError),
}

pub struct FleetPoller {
    sessions: Arc<dyn SessionFactory>,
    collectors: Arc<Collectors>,

    /// Short tier in front of the collectors' own caches
    device_cache: MetricCache<DeviceMetrics>,

    last_seen: Mutex<HashMap<u64, DateTime<Utc>>>,
    snmp: SnmpConfig,
    max_workers: usize,
    retry_backoff: Duration,
}

impl FleetPoller {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        collectors: Arc<Collectors>,
        snmp: SnmpConfig,
        polling: &PollingConfig,
    ) -> Self {
        Self {
            sessions,
            collectors,
            device_cache: MetricCache::new(polling.poller_cache_ttl()),
            last_seen: Mutex::new(HashMap::new()),
            snmp,
            max_workers: polling.max_workers.max(1),
            retry_backoff: polling.retry_backoff(),
        }
    }

    pub fn from_config(sessions: Arc<dyn SessionFactory>, config: &Config) -> Self {
        let collectors = Arc::new(Collectors::from_config(&config.polling));
        Self::new(sessions, collectors, config.snmp.clone(), &config.polling)
    }

    pub fn collectors(&self) -> &Collectors {
        &self.collectors
    }

    /// Poll every equipment and wait for all of them
    ///
    /// Results come back in completion order.
    #[instrument(skip_all, fields(equipment = equipment.len()))]
    pub async fn poll_all(self: &Arc<Self>, equipment: &[Equipment]) -> Vec<EquipmentStatus> {
        let workers = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();

        for item in equipment.iter().cloned() {
            let poller = Arc::clone(self);
            let workers = Arc::clone(&workers);
            let task_item = item.clone();
            let handle = tasks.spawn(async move {
                let _permit = workers.acquire_owned().await.ok();
                poller.poll_one(&task_item).await
            });
            pending.insert(handle.id(), item);
        }

        let mut statuses = Vec::with_capacity(equipment.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, status)) => {
                    pending.remove(&id);
                    statuses.push(status);
                }
                Err(e) => {
                    error!("poll task failed: {e}");
                    if let Some(item) = pending.remove(&e.id()) {
                        let last_seen = self.last_seen_of(item.id);
                        statuses.push(EquipmentStatus::offline(
                            &item,
                            format!("poll task failed: {e}"),
                            last_seen,
                        ));
                    }
                }
            }
        }

        let online = statuses.iter().filter(|s| s.is_online()).count();
        debug!(online, offline = statuses.len() - online, "fleet poll finished");
        statuses
    }

    /// Poll a single equipment with retry-then-offline
    #[instrument(skip_all, fields(equipment = %equipment.name, ip = %equipment.ip))]
    pub async fn poll_one(&self, equipment: &Equipment) -> EquipmentStatus {
        let key = CacheKey::new(
            &equipment.ip,
            &equipment.credential,
            CacheKind::Device(equipment.kind),
        );
        let result = self
            .device_cache
            .get_or_try_insert_with(&key, || self.collect_with_retry(equipment))
            .await;

        match result {
            Ok(metrics) => {
                let now = Utc::now();
                self.last_seen
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(equipment.id, now);
                EquipmentStatus::online(equipment, metrics, now)
            }
            Err(e) => {
                warn!(error = %e, "equipment offline");
                EquipmentStatus::offline(equipment, e.to_string(), self.last_seen_of(equipment.id))
            }
        }
    }

    async fn collect_with_retry(&self, equipment: &Equipment) -> Result<DeviceMetrics, CollectError> {
        let mut state = RetryState::Attempt1;
        loop {
            state = match state {
                RetryState::Attempt1 => match self.attempt(equipment).await {
                    Ok(metrics) => RetryState::Online(metrics),
                    Err(e) => {
                        debug!(error = %e, backoff = ?self.retry_backoff, "first attempt failed, retrying");
                        tokio::time::sleep(self.retry_backoff).await;
                        RetryState::Attempt2
                    }
                },
                RetryState::Attempt2 => match self.attempt(equipment).await {
                    Ok(metrics) => RetryState::Online(metrics),
                    Err(e) => RetryState::Offline(e),
                },
                RetryState::Online(metrics) => return Ok(metrics),
                RetryState::Offline(e) => return Err(e),
            };
        }
    }

    async fn attempt(&self, equipment: &Equipment) -> Result<DeviceMetrics, CollectError> {
        let session = self.open(equipment).await?;
        self.collectors.collect(session.as_ref(), equipment).await
    }

    async fn open(&self, equipment: &Equipment) -> Result<Box<dyn Session>, CollectError> {
        self.sessions
            .open(&equipment.session_options(&self.snmp))
            .await
            .map_err(CollectError::Unreachable)
    }

    fn last_seen_of(&self, id: u64) -> Option<DateTime<Utc>> {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
    }

    /// Single sysDescr read, no retry and no cache
    #[instrument(skip_all, fields(ip = %equipment.ip))]
    pub async fn test_connectivity(&self, equipment: &Equipment) -> ConnectivityReport {
        let read = async {
            let session = self.open(equipment).await.map_err(|e| e.to_string())?;
            let value = session
                .get(&oids::oid(oids::SYS_DESCR))
                .await
                .map_err(|e| e.to_string())?;
            if value.is_empty() {
                return Err("no SNMP response".to_string());
            }
            Ok(value.as_text())
        };

        match read.await {
            Ok(description) => {
                debug!("SNMP connectivity OK");
                ConnectivityReport {
                    online: true,
                    description: Some(description),
                    error: None,
                }
            }
            Err(error) => {
                warn!(%error, "SNMP connectivity check failed");
                ConnectivityReport {
                    online: false,
                    description: None,
                    error: Some(error),
                }
            }
        }
    }

    /// Drop expired entries from the device tier and both collectors' caches
    ///
    /// Returns how many cache slots remain.
    pub fn purge_caches(&self) -> usize {
        let remaining = self.device_cache.purge_expired() + self.collectors.purge_expired();
        trace!(remaining, "expired cache entries purged");
        remaining
    }

    /// On-demand counters of one switch port
    pub async fn interface_traffic(
        &self,
        equipment: &Equipment,
        index: u32,
    ) -> Result<InterfaceTraffic, CollectError> {
        let session = self.open(equipment).await?;
        self.collectors
            .switch
            .interface_traffic(session.as_ref(), index)
            .await
    }
}
