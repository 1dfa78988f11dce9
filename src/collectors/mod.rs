//! Per-type metric collection
//!
//! Collectors turn a [`Session`] into typed metric bundles. Individual OID
//! failures are recorded in the bundle's error map and never abort the
//! collection; the only whole-device failure is [`CollectError::Unreachable`],
//! raised when the device did not answer at all.

pub mod server;
pub mod switch;

use std::fmt;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::{DeviceMetrics, FieldErrors};
use crate::config::{Equipment, EquipmentKind, PollingConfig};
use crate::snmp::{Oid, Session, SnmpError, SnmpResult, SnmpValue};

pub use server::{CpuSample, ServerCollector, cpu_percent};
pub use switch::{SwitchCollector, normalize_mac};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectError {
    /// The device did not answer any request
    Unreachable(SnmpError),
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::Unreachable(e) => write!(f, "device unreachable: {e}"),
        }
    }
}

impl std::error::Error for CollectError {}

/// Both collectors, dispatched by equipment type
pub struct Collectors {
    pub server: ServerCollector,
    pub switch: SwitchCollector,
}

impl Collectors {
    pub fn new(cache_ttl: Duration, cpu_resample_delay: Duration) -> Self {
        Self {
            server: ServerCollector::new(cache_ttl, cpu_resample_delay),
            switch: SwitchCollector::new(cache_ttl),
        }
    }

    pub fn from_config(polling: &PollingConfig) -> Self {
        Self::new(polling.collector_cache_ttl(), polling.cpu_resample_delay())
    }

    #[instrument(skip_all, fields(equipment = %equipment.name, ip = %equipment.ip))]
    pub async fn collect(
        &self,
        session: &dyn Session,
        equipment: &Equipment,
    ) -> Result<DeviceMetrics, CollectError> {
        match equipment.kind {
            EquipmentKind::Server => self
                .server
                .collect(session, &equipment.ip, &equipment.credential)
                .await
                .map(DeviceMetrics::Server),
            EquipmentKind::Switch => self
                .switch
                .collect(session, &equipment.ip, &equipment.credential)
                .await
                .map(DeviceMetrics::Switch),
        }
    }

    /// Drop expired entries from both collectors' caches
    pub fn purge_expired(&self) -> usize {
        self.server.purge_expired() + self.switch.purge_expired()
    }
}

/// Outcome counts of independent fetches, used to tell "device down" apart
/// from "some OIDs missing"
#[derive(Debug, Default)]
pub(crate) struct FetchTally {
    attempted: usize,
    transport_failures: usize,
    last_transport: Option<SnmpError>,
}

impl FetchTally {
    pub(crate) fn record<T>(&mut self, result: &SnmpResult<T>) {
        self.attempted += 1;
        if let Err(e) = result {
            if e.is_transport() {
                self.transport_failures += 1;
                self.last_transport = Some(e.clone());
            }
        }
    }

    /// The transport error if every recorded fetch failed at the network level
    pub(crate) fn unreachable(self) -> Option<SnmpError> {
        if self.attempted > 0 && self.transport_failures == self.attempted {
            self.last_transport
        } else {
            None
        }
    }
}

/// Keep a successful value, or log the failure and file it under `field`
pub(crate) fn record_field_error<T>(
    errors: &mut FieldErrors,
    field: &str,
    result: SnmpResult<T>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(field, error = %e, "field unavailable");
            errors.insert(field.to_string(), e.to_string());
            None
        }
    }
}

/// `get` that treats an empty value as missing
pub(crate) async fn fetch_value(session: &dyn Session, oid: &Oid) -> SnmpResult<SnmpValue> {
    let value = session.get(oid).await?;
    if value.is_empty() {
        return Err(SnmpError::NoSuchObject(oid.clone()));
    }
    Ok(value)
}

pub(crate) async fn fetch_u64(session: &dyn Session, oid: &Oid) -> SnmpResult<u64> {
    let value = fetch_value(session, oid).await?;
    value
        .as_u64()
        .ok_or_else(|| SnmpError::Decode(format!("non-numeric value '{}' at {oid}", value.as_text())))
}

pub(crate) async fn fetch_i64(session: &dyn Session, oid: &Oid) -> SnmpResult<i64> {
    let value = fetch_value(session, oid).await?;
    value
        .as_i64()
        .ok_or_else(|| SnmpError::Decode(format!("non-numeric value '{}' at {oid}", value.as_text())))
}

pub(crate) async fn fetch_text(session: &dyn Session, oid: &Oid) -> SnmpResult<String> {
    fetch_value(session, oid).await.map(|value| value.as_text())
}
