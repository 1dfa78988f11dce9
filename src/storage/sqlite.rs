//! SQLite storage backend
//!
//! - **Embedded**: no separate database server required
//! - **WAL mode**: readers are not blocked by the poll-cycle writer
//! - **Migrations**: schema versioned with `sqlx::migrate!`
//!
//! Samples keep their headline percentages as columns and the full bundle as
//! JSON; alerts are one row each with flag/timestamp column pairs.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{AlertStore, HealthStatus, MAX_SAMPLES_PER_EQUIPMENT, MetricsStore};
use super::error::{StorageError, StorageResult};
use super::schema::MetricSample;
use crate::DeviceMetrics;
use crate::alerts::{Alert, AlertLevel, NewAlert};

const SAMPLE_COLUMNS: &str = "equipment_id, timestamp, cpu_percent, memory_percent, disk_percent, \
     traffic_in, traffic_out, metrics";

const ALERT_COLUMNS: &str = "id, kind, level, message, equipment_id, equipment_name, created_at, \
     email_sent, email_sent_at, resolved, resolved_at, acknowledged, acknowledged_at";

pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
    capacity: usize,
}

impl SqliteBackend {
    /// Open (or create) the database file and run migrations
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::with_capacity(db_path, MAX_SAMPLES_PER_EQUIPMENT).await
    }

    pub async fn with_capacity(db_path: impl AsRef<Path>, capacity: usize) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
            capacity: capacity.max(1),
        })
    }

    pub async fn close(&self) {
        info!("closing SQLite backend");
        self.pool.close().await;
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn optional_timestamp(millis: Option<i64>) -> Option<DateTime<Utc>> {
        millis.map(Self::millis_to_timestamp)
    }

    fn sample_from_row(row: &SqliteRow) -> StorageResult<MetricSample> {
        let metrics_json: String = row.try_get("metrics")?;
        let metrics: DeviceMetrics = serde_json::from_str(&metrics_json)?;

        Ok(MetricSample {
            equipment_id: row.try_get::<i64, _>("equipment_id")? as u64,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
            cpu_percent: row.try_get("cpu_percent")?,
            memory_percent: row.try_get("memory_percent")?,
            disk_percent: row.try_get("disk_percent")?,
            traffic_in: row.try_get::<Option<i64>, _>("traffic_in")?.map(|v| v as u64),
            traffic_out: row.try_get::<Option<i64>, _>("traffic_out")?.map(|v| v as u64),
            metrics,
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<Alert> {
        let kind: String = row.try_get("kind")?;
        let level: String = row.try_get("level")?;

        Ok(Alert {
            id: row.try_get::<i64, _>("id")? as u64,
            kind: kind.parse().map_err(StorageError::SerializationError)?,
            level: level.parse().map_err(StorageError::SerializationError)?,
            message: row.try_get("message")?,
            equipment_id: row.try_get::<Option<i64>, _>("equipment_id")?.map(|v| v as u64),
            equipment_name: row.try_get("equipment_name")?,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
            email_sent: row.try_get("email_sent")?,
            email_sent_at: Self::optional_timestamp(row.try_get("email_sent_at")?),
            resolved: row.try_get("resolved")?,
            resolved_at: Self::optional_timestamp(row.try_get("resolved_at")?),
            acknowledged: row.try_get("acknowledged")?,
            acknowledged_at: Self::optional_timestamp(row.try_get("acknowledged_at")?),
        })
    }

    async fn set_flag(&self, id: u64, flag: &str, at: DateTime<Utc>) -> StorageResult<Alert> {
        let sql = format!("UPDATE alerts SET {flag} = 1, {flag}_at = ? WHERE id = ?");
        let result = sqlx::query(&sql)
            .bind(Self::timestamp_to_millis(&at))
            .bind(id as i64)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::AlertNotFound(id));
        }

        self.get_alert(id)
            .await?
            .ok_or(StorageError::AlertNotFound(id))
    }
}

#[async_trait]
impl MetricsStore for SqliteBackend {
    #[instrument(skip(self, sample), fields(equipment_id = sample.equipment_id))]
    async fn append(&self, sample: MetricSample) -> StorageResult<()> {
        let metrics_json = serde_json::to_string(&sample.metrics)?;
        let equipment_id = sample.equipment_id as i64;

        let mut tx = self.pool.begin().await?;

        let sql = format!("INSERT INTO metric_samples ({SAMPLE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)");
        sqlx::query(&sql)
            .bind(equipment_id)
            .bind(Self::timestamp_to_millis(&sample.timestamp))
            .bind(sample.cpu_percent)
            .bind(sample.memory_percent)
            .bind(sample.disk_percent)
            .bind(sample.traffic_in.map(|v| v as i64))
            .bind(sample.traffic_out.map(|v| v as i64))
            .bind(metrics_json)
            .execute(&mut *tx)
            .await?;

        let evicted = sqlx::query(
            r#"
            DELETE FROM metric_samples
            WHERE equipment_id = ? AND id NOT IN (
                SELECT id FROM metric_samples
                WHERE equipment_id = ?
                ORDER BY timestamp DESC, id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(equipment_id)
        .bind(equipment_id)
        .bind(self.capacity as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if evicted.rows_affected() > 0 {
            debug!(evicted = evicted.rows_affected(), "ring capacity reached");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest(&self, equipment_id: u64, limit: usize) -> StorageResult<Vec<MetricSample>> {
        let sql = format!(
            "SELECT {SAMPLE_COLUMNS} FROM metric_samples WHERE equipment_id = ? \
             ORDER BY timestamp DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(equipment_id as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut samples = rows
            .iter()
            .map(Self::sample_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        // Reverse to get chronological order (oldest first)
        samples.reverse();
        Ok(samples)
    }

    #[instrument(skip(self))]
    async fn query_range(
        &self,
        equipment_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricSample>> {
        let sql = format!(
            "SELECT {SAMPLE_COLUMNS} FROM metric_samples \
             WHERE equipment_id = ? AND timestamp >= ? AND timestamp <= ? \
             ORDER BY timestamp ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(equipment_id as i64)
            .bind(Self::timestamp_to_millis(&start))
            .bind(Self::timestamp_to_millis(&end))
            .fetch_all(&self.pool)
            .await?;

        let samples = rows
            .iter()
            .map(Self::sample_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        debug!("query returned {} samples", samples.len());
        Ok(samples)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM metric_samples WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old samples", deleted);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite backend operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }
}

#[async_trait]
impl AlertStore for SqliteBackend {
    #[instrument(skip(self, alert), fields(level = %alert.level))]
    async fn append_alert(&self, alert: NewAlert, created_at: DateTime<Utc>) -> StorageResult<Alert> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (kind, level, message, equipment_id, equipment_name, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.kind.as_str())
        .bind(alert.level.as_str())
        .bind(&alert.message)
        .bind(alert.equipment_id.map(|v| v as i64))
        .bind(&alert.equipment_name)
        .bind(Self::timestamp_to_millis(&created_at))
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid() as u64;
        Ok(Alert::from_new(id, alert, created_at))
    }

    async fn get_alert(&self, id: u64) -> StorageResult<Option<Alert>> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::alert_from_row).transpose()
    }

    async fn list_alerts(&self) -> StorageResult<Vec<Alert>> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts ORDER BY id ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::alert_from_row).collect()
    }

    async fn pending_notifications(&self) -> StorageResult<Vec<Alert>> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE email_sent = 0 AND level IN (?, ?) ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(AlertLevel::Error.as_str())
            .bind(AlertLevel::Critical.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::alert_from_row).collect()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn mark_sent(&self, ids: &[u64], sent_at: DateTime<Utc>) -> StorageResult<()> {
        let sent_at = Self::timestamp_to_millis(&sent_at);
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("UPDATE alerts SET email_sent = 1, email_sent_at = ? WHERE id = ?")
                .bind(sent_at)
                .bind(*id as i64)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn resolve(&self, id: u64, at: DateTime<Utc>) -> StorageResult<Alert> {
        self.set_flag(id, "resolved", at).await
    }

    async fn acknowledge(&self, id: u64, at: DateTime<Utc>) -> StorageResult<Alert> {
        self.set_flag(id, "acknowledged", at).await
    }
}
