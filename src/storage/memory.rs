//! In-memory storage backend (no persistence)
//!
//! Samples live in a ring buffer per equipment; alerts in a plain vector with
//! an id counter. All data is lost on restart.

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::backend::{AlertStore, HealthStatus, MAX_SAMPLES_PER_EQUIPMENT, MetricsStore};
use super::error::{StorageError, StorageResult};
use super::schema::MetricSample;
use crate::alerts::{Alert, NewAlert};

struct AlertLog {
    next_id: u64,
    alerts: Vec<Alert>,
}

pub struct MemoryBackend {
    capacity: usize,
    samples: RwLock<HashMap<u64, VecDeque<MetricSample>>>,
    alerts: RwLock<AlertLog>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_capacity(MAX_SAMPLES_PER_EQUIPMENT)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: RwLock::new(HashMap::new()),
            alerts: RwLock::new(AlertLog {
                next_id: 1,
                alerts: Vec::new(),
            }),
        }
    }

    fn update_alert(
        &self,
        id: u64,
        update: impl FnOnce(&mut Alert),
    ) -> StorageResult<Alert> {
        let mut log = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
        let alert = log
            .alerts
            .iter_mut()
            .find(|alert| alert.id == id)
            .ok_or(StorageError::AlertNotFound(id))?;
        update(alert);
        Ok(alert.clone())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsStore for MemoryBackend {
    async fn append(&self, sample: MetricSample) -> StorageResult<()> {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        let ring = samples.entry(sample.equipment_id).or_default();
        ring.push_back(sample);
        while ring.len() > self.capacity {
            ring.pop_front();
        }
        trace!(len = ring.len(), "sample appended");
        Ok(())
    }

    async fn latest(&self, equipment_id: u64, limit: usize) -> StorageResult<Vec<MetricSample>> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        let Some(ring) = samples.get(&equipment_id) else {
            return Ok(Vec::new());
        };

        let skip = ring.len().saturating_sub(limit);
        Ok(ring.iter().skip(skip).cloned().collect())
    }

    async fn query_range(
        &self,
        equipment_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricSample>> {
        debug!("querying in-memory samples for equipment {}", equipment_id);

        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<MetricSample> = samples
            .get(&equipment_id)
            .map(|ring| {
                ring.iter()
                    .filter(|s| s.timestamp >= start && s.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by_key(|s| s.timestamp);
        Ok(matching)
    }

    async fn cleanup_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        let mut deleted = 0;
        for ring in samples.values_mut() {
            let len = ring.len();
            ring.retain(|s| s.timestamp >= before);
            deleted += len - ring.len();
        }
        debug!("deleted {} old samples", deleted);
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        let total: usize = samples.values().map(VecDeque::len).sum();
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_samples".to_string(), total.to_string()),
                ("equipment".to_string(), samples.len().to_string()),
            ]),
        })
    }
}

#[async_trait]
impl AlertStore for MemoryBackend {
    async fn append_alert(&self, alert: NewAlert, created_at: DateTime<Utc>) -> StorageResult<Alert> {
        let mut log = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
        let id = log.next_id;
        log.next_id += 1;

        let alert = Alert::from_new(id, alert, created_at);
        log.alerts.push(alert.clone());
        Ok(alert)
    }

    async fn get_alert(&self, id: u64) -> StorageResult<Option<Alert>> {
        let log = self.alerts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(log.alerts.iter().find(|alert| alert.id == id).cloned())
    }

    async fn list_alerts(&self) -> StorageResult<Vec<Alert>> {
        let log = self.alerts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(log.alerts.clone())
    }

    async fn pending_notifications(&self) -> StorageResult<Vec<Alert>> {
        let log = self.alerts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(log
            .alerts
            .iter()
            .filter(|alert| alert.is_pending_notification())
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, ids: &[u64], sent_at: DateTime<Utc>) -> StorageResult<()> {
        let mut log = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
        for alert in log.alerts.iter_mut().filter(|alert| ids.contains(&alert.id)) {
            alert.email_sent = true;
            alert.email_sent_at = Some(sent_at);
        }
        Ok(())
    }

    async fn resolve(&self, id: u64, at: DateTime<Utc>) -> StorageResult<Alert> {
        self.update_alert(id, |alert| {
            alert.resolved = true;
            alert.resolved_at = Some(at);
        })
    }

    async fn acknowledge(&self, id: u64, at: DateTime<Utc>) -> StorageResult<Alert> {
        self.update_alert(id, |alert| {
            alert.acknowledged = true;
            alert.acknowledged_at = Some(at);
        })
    }
}
