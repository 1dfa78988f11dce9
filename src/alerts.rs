//! Alert records and threshold rules
//!
//! The engine is stateless: every pass re-evaluates the current metrics and
//! emits one [`NewAlert`] per satisfied rule. Duplicate suppression happens
//! on delivery, in the notification batcher.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::Equipment;
use crate::poller::EquipmentStatus;
use crate::{DeviceMetrics, ServerMetrics, SwitchMetrics};

pub const CPU_THRESHOLD: f64 = 90.0;
pub const MEMORY_THRESHOLD: f64 = 90.0;

/// `ifOperStatus` value for a down link
pub const OPER_STATUS_DOWN: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    /// Only these levels enter the notification pipeline
    pub fn is_notifiable(self) -> bool {
        matches!(self, AlertLevel::Error | AlertLevel::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(AlertLevel::Info),
            "warning" => Ok(AlertLevel::Warning),
            "error" => Ok(AlertLevel::Error),
            "critical" => Ok(AlertLevel::Critical),
            other => Err(format!("unknown alert level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Cpu,
    Memory,
    Disk,
    Interface,
    Network,
    Test,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Cpu => "cpu",
            AlertKind::Memory => "memory",
            AlertKind::Disk => "disk",
            AlertKind::Interface => "interface",
            AlertKind::Network => "network",
            AlertKind::Test => "test",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(AlertKind::Cpu),
            "memory" => Ok(AlertKind::Memory),
            "disk" => Ok(AlertKind::Disk),
            "interface" => Ok(AlertKind::Interface),
            "network" => Ok(AlertKind::Network),
            "test" => Ok(AlertKind::Test),
            other => Err(format!("unknown alert kind '{other}'")),
        }
    }
}

/// An alert before the store assigned it an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    pub kind: AlertKind,
    pub level: AlertLevel,
    pub message: String,
    pub equipment_id: Option<u64>,
    pub equipment_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub level: AlertLevel,
    pub message: String,
    pub equipment_id: Option<u64>,
    pub equipment_name: String,
    pub created_at: DateTime<Utc>,

    pub email_sent: bool,
    pub email_sent_at: Option<DateTime<Utc>>,

    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,

    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn from_new(id: u64, alert: NewAlert, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: alert.kind,
            level: alert.level,
            message: alert.message,
            equipment_id: alert.equipment_id,
            equipment_name: alert.equipment_name,
            created_at,
            email_sent: false,
            email_sent_at: None,
            resolved: false,
            resolved_at: None,
            acknowledged: false,
            acknowledged_at: None,
        }
    }

    /// Error or critical, and not yet delivered
    pub fn is_pending_notification(&self) -> bool {
        self.level.is_notifiable() && !self.email_sent
    }
}

/// Static threshold rules
#[derive(Debug, Clone)]
pub struct AlertEngine {
    cpu_threshold: f64,
    memory_threshold: f64,
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self {
            cpu_threshold: CPU_THRESHOLD,
            memory_threshold: MEMORY_THRESHOLD,
        }
    }
}

impl AlertEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate every equipment that has current metrics
    pub fn evaluate(
        &self,
        equipment: &[Equipment],
        current: &HashMap<u64, DeviceMetrics>,
    ) -> Vec<NewAlert> {
        equipment
            .iter()
            .filter_map(|item| {
                current
                    .get(&item.id)
                    .map(|metrics| self.evaluate_device(item.id, &item.name, metrics))
            })
            .flatten()
            .collect()
    }

    /// Evaluate the online devices of one fleet poll
    #[instrument(skip_all, fields(devices = statuses.len()))]
    pub fn evaluate_statuses(&self, statuses: &[EquipmentStatus]) -> Vec<NewAlert> {
        let alerts: Vec<_> = statuses
            .iter()
            .filter_map(|status| {
                status
                    .metrics
                    .as_ref()
                    .map(|metrics| self.evaluate_device(status.id, &status.name, metrics))
            })
            .flatten()
            .collect();
        debug!(alerts = alerts.len(), "alert rules evaluated");
        alerts
    }

    pub fn evaluate_device(
        &self,
        equipment_id: u64,
        equipment_name: &str,
        metrics: &DeviceMetrics,
    ) -> Vec<NewAlert> {
        let alert = |kind, level, message| NewAlert {
            kind,
            level,
            message,
            equipment_id: Some(equipment_id),
            equipment_name: equipment_name.to_string(),
        };

        match metrics {
            DeviceMetrics::Server(server) => self
                .server_breaches(server)
                .into_iter()
                .map(|(kind, message)| {
                    alert(kind, AlertLevel::Critical, format!("{message} sur {equipment_name}"))
                })
                .collect(),
            DeviceMetrics::Switch(switch) => down_interfaces(switch)
                .map(|name| {
                    alert(
                        AlertKind::Interface,
                        AlertLevel::Info,
                        format!("Interface {name} DOWN sur {equipment_name}"),
                    )
                })
                .collect(),
        }
    }

    fn server_breaches(&self, server: &ServerMetrics) -> Vec<(AlertKind, &'static str)> {
        let mut breaches = Vec::new();
        if server.cpu_percent.is_some_and(|cpu| cpu > self.cpu_threshold) {
            breaches.push((AlertKind::Cpu, "CPU > 90%"));
        }
        if server
            .memory_percent()
            .is_some_and(|memory| memory > self.memory_threshold)
        {
            breaches.push((AlertKind::Memory, "RAM > 90%"));
        }
        breaches
    }
}

fn down_interfaces(switch: &SwitchMetrics) -> impl Iterator<Item = &str> {
    switch
        .interfaces
        .iter()
        .filter(|interface| interface.oper_status == OPER_STATUS_DOWN)
        .map(|interface| interface.name.as_str())
}
