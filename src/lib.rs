pub mod actors;
pub mod alerts;
pub mod cache;
pub mod collectors;
pub mod config;
pub mod keyed;
pub mod notify;
pub mod poller;
pub mod snmp;
pub mod storage;
pub mod util;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::{kb_to_gb, kb_to_mb, percent_of, round2};

/// Per-field failures of one collection, keyed by field name
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMetrics {
    pub system_name: String,

    /// Busy share of CPU time since the previous sample; `None` when the
    /// counters could not be read
    pub cpu_percent: Option<f64>,

    pub memory: Option<MemoryInformation>,
    pub disk: DiskInformation,
    pub errors: FieldErrors,
    pub collected_at: DateTime<Utc>,
}

impl ServerMetrics {
    pub fn memory_percent(&self) -> Option<f64> {
        self.memory.as_ref().map(|memory| memory.percent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInformation {
    pub total_kb: u64,
    pub used_kb: u64,
    pub free_kb: u64,
    pub percent: f64,
    pub total_mb: f64,
    pub used_mb: f64,
    pub free_mb: f64,
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
}

impl MemoryInformation {
    /// Build from the agent's kB readings; `total == 0` yields 0%
    pub fn from_kb(total_kb: u64, free_kb: u64) -> Self {
        let used_kb = total_kb.saturating_sub(free_kb);
        Self {
            total_kb,
            used_kb,
            free_kb,
            percent: percent_of(used_kb, total_kb),
            total_mb: round2(kb_to_mb(total_kb as f64)),
            used_mb: round2(kb_to_mb(used_kb as f64)),
            free_mb: round2(kb_to_mb(free_kb as f64)),
            total_gb: round2(kb_to_gb(total_kb as f64)),
            used_gb: round2(kb_to_gb(used_kb as f64)),
            free_gb: round2(kb_to_gb(free_kb as f64)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskInformation {
    /// Mount path of the matched storage row; `None` when no root filesystem was found
    pub path: Option<String>,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub percent: f64,
    pub total_kb: f64,
    pub used_kb: f64,
    pub free_kb: f64,
    pub total_mb: f64,
    pub used_mb: f64,
    pub free_mb: f64,
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
}

impl DiskInformation {
    pub fn from_bytes(path: impl Into<String>, total_bytes: u64, used_bytes: u64) -> Self {
        let used_bytes = used_bytes.min(total_bytes);
        let free_bytes = total_bytes - used_bytes;
        let kb = |bytes: u64| bytes as f64 / 1024.0;
        Self {
            path: Some(path.into()),
            total_bytes,
            used_bytes,
            free_bytes,
            percent: percent_of(used_bytes, total_bytes),
            total_kb: round2(kb(total_bytes)),
            used_kb: round2(kb(used_bytes)),
            free_kb: round2(kb(free_bytes)),
            total_mb: round2(kb_to_mb(kb(total_bytes))),
            used_mb: round2(kb_to_mb(kb(used_bytes))),
            free_mb: round2(kb_to_mb(kb(free_bytes))),
            total_gb: round2(kb_to_gb(kb(total_bytes))),
            used_gb: round2(kb_to_gb(kb(used_bytes))),
            free_gb: round2(kb_to_gb(kb(free_bytes))),
        }
    }

    /// No root filesystem among the storage rows read
    pub fn empty() -> Self {
        Self {
            path: None,
            total_bytes: 0,
            used_bytes: 0,
            free_bytes: 0,
            percent: 0.0,
            total_kb: 0.0,
            used_kb: 0.0,
            free_kb: 0.0,
            total_mb: 0.0,
            used_mb: 0.0,
            free_mb: 0.0,
            total_gb: 0.0,
            used_gb: 0.0,
            free_gb: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Up,
    Down,
}

impl LinkStatus {
    /// `1` is up, every other code (including a missing one) is down
    pub fn from_code(code: i64) -> Self {
        if code == 1 {
            LinkStatus::Up
        } else {
            LinkStatus::Down
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounters {
    pub in_octets: u64,
    pub out_octets: u64,
    pub in_errors: u64,
    pub out_errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub index: u32,
    pub name: String,

    /// Raw ifAdminStatus / ifOperStatus codes (0 when unreadable)
    pub admin_status: i64,
    pub oper_status: i64,
    pub admin_status_text: LinkStatus,
    pub oper_status_text: LinkStatus,

    pub speed: u64,
    pub traffic: TrafficCounters,
}

/// Interface counters read on demand for a single port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceTraffic {
    pub index: u32,
    pub speed: u64,
    pub traffic: TrafficCounters,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionStatus {
    #[serde(rename = "Detected")]
    Detected,
    #[serde(rename = "No connected device")]
    NoConnectedDevice,
    #[serde(rename = "SNMP Error")]
    SnmpError,
}

impl DetectionStatus {
    pub fn code(self) -> u8 {
        match self {
            DetectionStatus::Detected => 1,
            DetectionStatus::NoConnectedDevice | DetectionStatus::SnmpError => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DetectionStatus::Detected => "Detected",
            DetectionStatus::NoConnectedDevice => "No connected device",
            DetectionStatus::SnmpError => "SNMP Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedDevice {
    pub mac_address: String,
    pub port_number: u32,
    pub interface_name: String,
    pub status: DetectionStatus,
}

impl ConnectedDevice {
    /// Placeholder returned instead of an empty device list
    pub fn sentinel(status: DetectionStatus) -> Self {
        Self {
            mac_address: "None".to_string(),
            port_number: 0,
            interface_name: "None".to_string(),
            status,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.status != DetectionStatus::Detected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchMetrics {
    pub system_name: String,
    pub uptime_ticks: u64,
    pub interfaces: Vec<InterfaceRecord>,
    pub connected_devices: Vec<ConnectedDevice>,
    pub errors: FieldErrors,
    pub collected_at: DateTime<Utc>,
}

impl SwitchMetrics {
    pub fn active_interfaces(&self) -> usize {
        self.interfaces
            .iter()
            .filter(|interface| interface.oper_status_text == LinkStatus::Up)
            .count()
    }

    /// Number of real devices, not counting the sentinel
    pub fn connected_device_count(&self) -> usize {
        self.connected_devices
            .iter()
            .filter(|device| !device.is_sentinel())
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceMetrics {
    Server(ServerMetrics),
    Switch(SwitchMetrics),
}

impl DeviceMetrics {
    pub fn system_name(&self) -> &str {
        match self {
            DeviceMetrics::Server(metrics) => &metrics.system_name,
            DeviceMetrics::Switch(metrics) => &metrics.system_name,
        }
    }

    pub fn collected_at(&self) -> DateTime<Utc> {
        match self {
            DeviceMetrics::Server(metrics) => metrics.collected_at,
            DeviceMetrics::Switch(metrics) => metrics.collected_at,
        }
    }

    pub fn errors(&self) -> &FieldErrors {
        match self {
            DeviceMetrics::Server(metrics) => &metrics.errors,
            DeviceMetrics::Switch(metrics) => &metrics.errors,
        }
    }
}
