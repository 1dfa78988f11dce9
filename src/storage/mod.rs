//! Metric and alert persistence
//!
//! The core talks to persistence only through [`MetricsStore`] and
//! [`AlertStore`]. Two backends implement both:
//!
//! - **In-memory** (default): ring buffers, nothing survives a restart
//! - **SQLite** (`storage-sqlite` feature): embedded database file
//!
//! ```no_run
//! use snmp_supervision::storage::{MetricsStore, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./supervision.db").await?;
//!     let health = backend.health_check().await?;
//!     println!("{}", health.message);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;

pub use backend::{AlertStats, AlertStore, HealthStatus, MAX_SAMPLES_PER_EQUIPMENT, MetricsStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{ChartSeries, MetricSample};

/// A backend usable for both samples and alerts
pub trait Storage: MetricsStore + AlertStore {
    fn metrics_store(self: Arc<Self>) -> Arc<dyn MetricsStore>;

    fn alert_store(self: Arc<Self>) -> Arc<dyn AlertStore>;
}

impl<T: MetricsStore + AlertStore + 'static> Storage for T {
    fn metrics_store(self: Arc<Self>) -> Arc<dyn MetricsStore> {
        self
    }

    fn alert_store(self: Arc<Self>) -> Arc<dyn AlertStore> {
        self
    }
}

/// Build the configured backend
pub async fn open(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    match config {
        StorageConfig::Memory => {
            info!("using in-memory storage");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            let backend = sqlite::SqliteBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}
