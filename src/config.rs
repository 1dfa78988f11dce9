use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::snmp::{SessionOptions, SnmpVersion, oids};

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory ring buffers (no persistence)
    #[serde(rename = "memory", alias = "none")]
    Memory,

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (samples older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

impl StorageConfig {
    /// Age limit for stored samples; in-memory rings are only capped by size
    pub fn retention_days(&self) -> Option<u32> {
        match self {
            StorageConfig::Memory => None,
            StorageConfig::Sqlite { retention_days, .. } => Some(*retention_days),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./supervision.db")
}

fn default_retention_days() -> u32 {
    7
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub equipment: Vec<Equipment>,

    #[serde(default)]
    pub snmp: SnmpConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Log level for crate targets (`trace`, `debug`, `info`, ...)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentKind {
    Server,
    Switch,
}

/// One polled device, as held by the equipment store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: u64,
    pub name: String,
    pub ip: String,

    #[serde(alias = "community", default = "default_credential")]
    pub credential: String,

    #[serde(rename = "type")]
    pub kind: EquipmentKind,

    #[serde(default)]
    pub version: SnmpVersion,
}

fn default_credential() -> String {
    "public".to_string()
}

impl Equipment {
    pub fn new(id: u64, name: impl Into<String>, ip: impl Into<String>, kind: EquipmentKind) -> Self {
        Self {
            id,
            name: name.into(),
            ip: ip.into(),
            credential: default_credential(),
            kind,
            version: SnmpVersion::default(),
        }
    }

    /// Session parameters for this device under the given protocol defaults
    pub fn session_options(&self, snmp: &SnmpConfig) -> SessionOptions {
        SessionOptions {
            host: self.ip.clone(),
            port: snmp.port,
            community: self.credential.clone(),
            version: self.version,
            timeout: snmp.timeout(),
            retries: snmp.retries,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnmpConfig {
    #[serde(default = "default_snmp_port")]
    pub port: u16,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retries: u32,
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            port: default_snmp_port(),
            timeout_ms: default_timeout_ms(),
            retries: 0,
        }
    }
}

impl SnmpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_snmp_port() -> u16 {
    oids::DEFAULT_PORT
}

fn default_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_one_second_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_one_second_ms")]
    pub cpu_resample_ms: u64,

    #[serde(default = "default_collector_cache_ttl")]
    pub collector_cache_ttl_secs: u64,

    #[serde(default = "default_poller_cache_ttl")]
    pub poller_cache_ttl_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            max_workers: default_max_workers(),
            retry_backoff_ms: default_one_second_ms(),
            cpu_resample_ms: default_one_second_ms(),
            collector_cache_ttl_secs: default_collector_cache_ttl(),
            poller_cache_ttl_secs: default_poller_cache_ttl(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn cpu_resample_delay(&self) -> Duration {
        Duration::from_millis(self.cpu_resample_ms)
    }

    pub fn collector_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.collector_cache_ttl_secs)
    }

    pub fn poller_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.poller_cache_ttl_secs)
    }
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_workers() -> usize {
    8
}

fn default_one_second_ms() -> u64 {
    1000
}

fn default_collector_cache_ttl() -> u64 {
    30
}

fn default_poller_cache_ttl() -> u64 {
    2
}

/// Where grouped notifications are delivered
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Discord(Discord),
    Webhook(Webhook),

    /// Write notifications to the log only
    #[default]
    Log,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Minimum time between two successful sends
    #[serde(default = "default_notification_interval")]
    pub interval_secs: u64,

    /// Free-form recipient label passed to the notifier
    #[serde(default)]
    pub recipient: String,

    #[serde(default)]
    pub channel: NotificationChannel,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_notification_interval(),
            recipient: String::new(),
            channel: NotificationChannel::default(),
        }
    }
}

impl NotificationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Replace the channel URL, keeping the channel kind; a log channel becomes a webhook
    pub fn override_url(&mut self, url: String) {
        self.channel = match std::mem::take(&mut self.channel) {
            NotificationChannel::Discord(discord) => NotificationChannel::Discord(Discord {
                url,
                user_id: discord.user_id,
            }),
            NotificationChannel::Webhook(_) | NotificationChannel::Log => {
                NotificationChannel::Webhook(Webhook { url })
            }
        };
    }
}

fn default_enabled() -> bool {
    true
}

fn default_notification_interval() -> u64 {
    300
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
