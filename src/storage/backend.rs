//! Storage collaborator traits
//!
//! The core only needs append/read/query capabilities from persistence;
//! these traits are what it programs against. Both backends implement both.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::error::StorageResult;
use super::schema::{ChartSeries, MetricSample};
use crate::alerts::{Alert, AlertLevel, NewAlert};

/// Ring capacity per equipment
pub const MAX_SAMPLES_PER_EQUIPMENT: usize = 1000;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Rolling per-equipment sample history
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Append one sample, evicting the oldest beyond the ring capacity
    async fn append(&self, sample: MetricSample) -> StorageResult<()>;

    /// The `limit` most recent samples, oldest first
    async fn latest(&self, equipment_id: u64, limit: usize) -> StorageResult<Vec<MetricSample>>;

    /// Samples with `start <= timestamp <= end`, oldest first
    async fn query_range(
        &self,
        equipment_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricSample>>;

    /// Chart-ready series over the last `hours`
    async fn query_window(&self, equipment_id: u64, hours: u32) -> StorageResult<ChartSeries> {
        let end = Utc::now();
        let start = end - Duration::hours(i64::from(hours));
        let samples = self.query_range(equipment_id, start, end).await?;
        Ok(ChartSeries::from_samples(&samples))
    }

    /// Delete samples older than `before`, returning how many were removed
    async fn cleanup_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    async fn health_check(&self) -> StorageResult<HealthStatus>;
}

/// Append-only alert list with id-indexed updates
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Store a new alert under the next id
    async fn append_alert(&self, alert: NewAlert, created_at: DateTime<Utc>) -> StorageResult<Alert>;

    async fn get_alert(&self, id: u64) -> StorageResult<Option<Alert>>;

    /// Every alert, oldest first
    async fn list_alerts(&self) -> StorageResult<Vec<Alert>>;

    /// Error or critical alerts not yet delivered, oldest first
    async fn pending_notifications(&self) -> StorageResult<Vec<Alert>>;

    /// Flag the given alerts as delivered at `sent_at`
    async fn mark_sent(&self, ids: &[u64], sent_at: DateTime<Utc>) -> StorageResult<()>;

    async fn resolve(&self, id: u64, at: DateTime<Utc>) -> StorageResult<Alert>;

    async fn acknowledge(&self, id: u64, at: DateTime<Utc>) -> StorageResult<Alert>;

    async fn alert_stats(&self) -> StorageResult<AlertStats> {
        let alerts = self.list_alerts().await?;
        Ok(AlertStats::from_alerts(&alerts))
    }
}

/// Summary counts over the whole alert list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertStats {
    pub total: usize,
    pub by_level: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,

    /// Delivered error/critical alerts
    pub sent: usize,

    /// Undelivered error/critical alerts
    pub pending: usize,

    pub critical: usize,
    pub error: usize,
}

impl AlertStats {
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        let mut stats = AlertStats {
            total: alerts.len(),
            ..Default::default()
        };

        for alert in alerts {
            *stats.by_level.entry(alert.level.to_string()).or_default() += 1;
            *stats.by_kind.entry(alert.kind.to_string()).or_default() += 1;

            match alert.level {
                AlertLevel::Critical => stats.critical += 1,
                AlertLevel::Error => stats.error += 1,
                AlertLevel::Info | AlertLevel::Warning => continue,
            }

            if alert.email_sent {
                stats.sent += 1;
            } else {
                stats.pending += 1;
            }
        }

        stats
    }
}
