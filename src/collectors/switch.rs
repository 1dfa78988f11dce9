//! Switch interfaces and MAC topology over IF-MIB and BRIDGE-MIB
//!
//! Topology is a three-table join:
//!
//! ```text
//! dot1dTpFdbAddress.<mac>  ─┐
//! dot1dTpFdbPort.<mac>      ├─> bridge port ──> dot1dBasePortIfIndex ──> ifDescr
//! ```
//!
//! Rows of the two forwarding-database columns are matched on their trailing
//! six arcs (the MAC address encoded in the index).

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, instrument, trace, warn};

use super::{CollectError, FetchTally, fetch_i64, fetch_text, fetch_u64, record_field_error};
use crate::cache::{CacheKey, CacheKind, MetricCache};
use crate::snmp::{Oid, Session, SnmpResult, SnmpValue, oids};
use crate::{
    ConnectedDevice, DetectionStatus, FieldErrors, InterfaceRecord, InterfaceTraffic, LinkStatus,
    SwitchMetrics, TrafficCounters,
};

/// Number of trailing index arcs that encode the MAC in FDB rows
const MAC_INDEX_ARCS: usize = 6;

/// sysName values that say nothing about the device
const GENERIC_NAMES: &[&str] = &["", "switch", "cisco", "default", "unknown"];

static HEX_MAC: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*[0-9A-Fa-f]{1,2}(?:[\s:\-.]+[0-9A-Fa-f]{1,2})+\s*$").ok()
});

/// Canonical `XX:XX:XX:XX:XX:XX` form of a forwarding-database address
///
/// Six-byte octet strings are taken as raw address bytes; longer octet
/// strings are parsed as hex text such as `"0C 9C C7 7F 00 01"`.
pub fn normalize_mac(value: &SnmpValue) -> String {
    match value {
        SnmpValue::OctetString(bytes) | SnmpValue::Opaque(bytes) => {
            if bytes.len() == MAC_INDEX_ARCS {
                return format_mac(bytes);
            }
            match std::str::from_utf8(bytes) {
                Ok(text) => normalize_mac_text(text),
                Err(_) => format_mac(bytes),
            }
        }
        other => other.as_text(),
    }
}

/// Canonical form of an address that was already decoded to text
///
/// Hex text is parsed; otherwise each character is taken as one byte, which
/// is how agents' raw octets look after a latin-1 decode.
pub fn normalize_mac_text(text: &str) -> String {
    if let Some(bytes) = parse_hex_mac(text) {
        return format_mac(&bytes);
    }

    let bytes: Option<Vec<u8>> = text.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect();
    match bytes {
        Some(bytes) if !bytes.is_empty() => format_mac(&bytes),
        _ => text.to_string(),
    }
}

fn parse_hex_mac(text: &str) -> Option<Vec<u8>> {
    let pattern = HEX_MAC.as_ref()?;
    if !pattern.is_match(text) {
        return None;
    }
    text.split(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | '.'))
        .filter(|part| !part.is_empty())
        .map(|part| u8::from_str_radix(part, 16).ok())
        .collect()
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(MAC_INDEX_ARCS)
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn is_generic_name(name: &str) -> bool {
    let name = name.trim().to_lowercase();
    GENERIC_NAMES.contains(&name.as_str())
}

pub struct SwitchCollector {
    cache: MetricCache<SwitchMetrics>,
    topology_cache: MetricCache<Vec<ConnectedDevice>>,
}

impl SwitchCollector {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            cache: MetricCache::new(cache_ttl),
            topology_cache: MetricCache::new(cache_ttl),
        }
    }

    /// Drop expired interface and topology entries
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired() + self.topology_cache.purge_expired()
    }

    /// Collect interfaces, uptime and topology, served from cache when fresh
    ///
    /// The device counts as unreachable only when the interface index walk
    /// fails at the network level.
    #[instrument(skip(self, session, credential))]
    pub async fn collect(
        &self,
        session: &dyn Session,
        ip: &str,
        credential: &str,
    ) -> Result<SwitchMetrics, CollectError> {
        let key = CacheKey::new(ip, credential, CacheKind::SwitchInterfaces);
        self.cache
            .get_or_try_insert_with(&key, || self.collect_uncached(session, ip, credential))
            .await
    }

    async fn collect_uncached(
        &self,
        session: &dyn Session,
        ip: &str,
        credential: &str,
    ) -> Result<SwitchMetrics, CollectError> {
        let mut errors = FieldErrors::new();

        let sys_name = fetch_text(session, &oids::oid(oids::SYS_NAME)).await;
        let sys_name = record_field_error(&mut errors, "system_name", sys_name);

        let uptime = fetch_u64(session, &oids::oid(oids::SYS_UPTIME)).await;
        let uptime_ticks = record_field_error(&mut errors, "system_uptime", uptime).unwrap_or(0);

        let interfaces = match self.collect_interfaces(session, &mut errors).await {
            Ok(interfaces) => interfaces,
            Err(e) if e.is_transport() => {
                warn!(%ip, error = %e, "interface walk failed, switch unreachable");
                return Err(CollectError::Unreachable(e));
            }
            Err(e) => {
                debug!(%ip, error = %e, "interface walk failed");
                errors.insert("interfaces_walk".to_string(), e.to_string());
                Vec::new()
            }
        };

        let connected_devices = self.resolve_topology(session, ip, credential).await;
        let system_name = resolve_switch_name(session, sys_name, ip).await;

        trace!(
            %ip,
            interfaces = interfaces.len(),
            devices = connected_devices.len(),
            failed_fields = errors.len(),
            "collected switch metrics"
        );

        Ok(SwitchMetrics {
            system_name,
            uptime_ticks,
            interfaces,
            connected_devices,
            errors,
            collected_at: Utc::now(),
        })
    }

    /// Walk `ifIndex`, then read every attribute of each row independently
    ///
    /// Attribute failures are recorded as `interface_{index}_{field}` and the
    /// row is kept with a zero/placeholder value.
    pub async fn collect_interfaces(
        &self,
        session: &dyn Session,
        errors: &mut FieldErrors,
    ) -> SnmpResult<Vec<InterfaceRecord>> {
        let rows = session.walk(&oids::oid(oids::IF_INDEX)).await?;
        let mut interfaces = Vec::with_capacity(rows.len());

        for (suffix, value) in rows {
            let index = value
                .as_u64()
                .and_then(|index| u32::try_from(index).ok())
                .or_else(|| suffix.last());
            let Some(index) = index else {
                debug!(%suffix, "skipping interface row without an index");
                continue;
            };

            let descr = fetch_text(session, &oids::row(oids::IF_DESCR, index)).await;
            let name = record_field_error(errors, &format!("interface_{index}_if_descr"), descr)
                .unwrap_or_else(|| format!("Interface {index}"));

            let admin = fetch_i64(session, &oids::row(oids::IF_ADMIN_STATUS, index)).await;
            let admin_status =
                record_field_error(errors, &format!("interface_{index}_if_admin_status"), admin)
                    .unwrap_or(0);

            let oper = fetch_i64(session, &oids::row(oids::IF_OPER_STATUS, index)).await;
            let oper_status =
                record_field_error(errors, &format!("interface_{index}_if_oper_status"), oper)
                    .unwrap_or(0);

            let speed = interface_counter(session, errors, oids::IF_SPEED, index, "if_speed").await;
            let traffic = TrafficCounters {
                in_octets: interface_counter(session, errors, oids::IF_IN_OCTETS, index, "if_in_octets").await,
                out_octets: interface_counter(session, errors, oids::IF_OUT_OCTETS, index, "if_out_octets").await,
                in_errors: interface_counter(session, errors, oids::IF_IN_ERRORS, index, "if_in_errors").await,
                out_errors: interface_counter(session, errors, oids::IF_OUT_ERRORS, index, "if_out_errors").await,
            };

            interfaces.push(InterfaceRecord {
                index,
                name,
                admin_status,
                oper_status,
                admin_status_text: LinkStatus::from_code(admin_status),
                oper_status_text: LinkStatus::from_code(oper_status),
                speed,
                traffic,
            });
        }

        Ok(interfaces)
    }

    /// Devices learned in the forwarding database, never empty
    ///
    /// Returns a single sentinel record when nothing was learned
    /// ([`DetectionStatus::NoConnectedDevice`]) or the forwarding database
    /// could not be read ([`DetectionStatus::SnmpError`]).
    #[instrument(skip(self, session, credential))]
    pub async fn resolve_topology(
        &self,
        session: &dyn Session,
        ip: &str,
        credential: &str,
    ) -> Vec<ConnectedDevice> {
        let key = CacheKey::new(ip, credential, CacheKind::Topology);
        match self
            .topology_cache
            .get_or_try_insert_with(&key, || resolve_topology_uncached(session))
            .await
        {
            Ok(devices) => devices,
            Err(e) => {
                warn!(%ip, error = %e, "forwarding database unavailable");
                vec![ConnectedDevice::sentinel(DetectionStatus::SnmpError)]
            }
        }
    }

    /// Counters and speed of one interface, read directly from the device
    #[instrument(skip(self, session))]
    pub async fn interface_traffic(
        &self,
        session: &dyn Session,
        index: u32,
    ) -> Result<InterfaceTraffic, CollectError> {
        let mut tally = FetchTally::default();
        let mut values = [0u64; 5];
        for (slot, (column, name)) in values.iter_mut().zip([
            (oids::IF_IN_OCTETS, "if_in_octets"),
            (oids::IF_OUT_OCTETS, "if_out_octets"),
            (oids::IF_IN_ERRORS, "if_in_errors"),
            (oids::IF_OUT_ERRORS, "if_out_errors"),
            (oids::IF_SPEED, "if_speed"),
        ]) {
            let value = fetch_u64(session, &oids::row(column, index)).await;
            tally.record(&value);
            *slot = match value {
                Ok(value) => value,
                Err(e) => {
                    warn!(index, field = name, error = %e, "traffic counter unavailable");
                    0
                }
            };
        }
        let [in_octets, out_octets, in_errors, out_errors, speed] = values;

        if let Some(e) = tally.unreachable() {
            return Err(CollectError::Unreachable(e));
        }

        Ok(InterfaceTraffic {
            index,
            speed,
            traffic: TrafficCounters {
                in_octets,
                out_octets,
                in_errors,
                out_errors,
            },
            collected_at: Utc::now(),
        })
    }
}

async fn resolve_topology_uncached(session: &dyn Session) -> SnmpResult<Vec<ConnectedDevice>> {
    let addresses = session.walk(&oids::oid(oids::DOT1D_TP_FDB_ADDRESS)).await?;
    if addresses.is_empty() {
        return Ok(vec![ConnectedDevice::sentinel(DetectionStatus::NoConnectedDevice)]);
    }

    // the port joins are required, a failed walk reports the whole table as an error
    let ports: HashMap<Oid, u32> = session
        .walk(&oids::oid(oids::DOT1D_TP_FDB_PORT))
        .await?
        .into_iter()
        .filter_map(|(suffix, value)| {
            let port = u32::try_from(value.as_u64()?).ok()?;
            Some((suffix.tail(MAC_INDEX_ARCS), port))
        })
        .collect();

    let port_to_ifindex: HashMap<u32, u32> = session
        .walk(&oids::oid(oids::DOT1D_BASE_PORT_IF_INDEX))
        .await?
        .into_iter()
        .filter_map(|(suffix, value)| {
            let if_index = u32::try_from(value.as_u64()?).ok()?;
            Some((suffix.last()?, if_index))
        })
        .collect();

    let ifindex_to_name: HashMap<u32, String> = walk_or_empty(session, oids::IF_DESCR)
        .await
        .into_iter()
        .filter_map(|(suffix, value)| Some((suffix.last()?, value.as_text())))
        .collect();

    let devices = addresses
        .into_iter()
        .map(|(suffix, value)| {
            let port_number = ports
                .get(&suffix.tail(MAC_INDEX_ARCS))
                .copied()
                .unwrap_or(0);
            let interface_name = port_to_ifindex
                .get(&port_number)
                .filter(|if_index| **if_index != 0)
                .and_then(|if_index| ifindex_to_name.get(if_index))
                .cloned()
                .unwrap_or_else(|| format!("Port {port_number}"));

            ConnectedDevice {
                mac_address: normalize_mac(&value),
                port_number,
                interface_name,
                status: DetectionStatus::Detected,
            }
        })
        .collect();

    Ok(devices)
}

async fn interface_counter(
    session: &dyn Session,
    errors: &mut FieldErrors,
    column: &[u32],
    index: u32,
    name: &str,
) -> u64 {
    let value = fetch_u64(session, &oids::row(column, index)).await;
    record_field_error(errors, &format!("interface_{index}_{name}"), value).unwrap_or(0)
}

/// Interface names degrade to "Port N" instead of failing the join
async fn walk_or_empty(session: &dyn Session, column: &[u32]) -> Vec<(Oid, SnmpValue)> {
    let oid = oids::oid(column);
    match session.walk(&oid).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(%oid, error = %e, "walk failed, continuing without this table");
            Vec::new()
        }
    }
}

async fn resolve_switch_name(session: &dyn Session, sys_name: Option<String>, ip: &str) -> String {
    if let Some(name) = sys_name.filter(|name| !is_generic_name(name)) {
        return name;
    }

    match fetch_text(session, &oids::oid(oids::SYS_DESCR)).await {
        Ok(descr) if descr.contains("Cisco IOS") => format!("Switch Cisco IOS ({ip})"),
        _ => format!("Switch ({ip})"),
    }
}
