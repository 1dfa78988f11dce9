//! Helper functions for integration tests

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use snmp_supervision::collectors::Collectors;
use snmp_supervision::config::{Equipment, EquipmentKind, PollingConfig, SnmpConfig};
use snmp_supervision::poller::FleetPoller;
use snmp_supervision::snmp::ber::{Message, Pdu, PduType};
use snmp_supervision::snmp::memory::MemoryAgent;
use snmp_supervision::snmp::{Oid, SessionFactory, SnmpValue, oids};
use snmp_supervision::{DeviceMetrics, DiskInformation, FieldErrors, MemoryInformation, ServerMetrics};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Polling settings with every delay and cache tier disabled
pub fn fast_polling() -> PollingConfig {
    PollingConfig {
        retry_backoff_ms: 0,
        cpu_resample_ms: 0,
        collector_cache_ttl_secs: 0,
        poller_cache_ttl_secs: 0,
        ..PollingConfig::default()
    }
}

pub fn create_poller(factory: Arc<dyn SessionFactory>, snmp: SnmpConfig) -> Arc<FleetPoller> {
    let polling = fast_polling();
    Arc::new(FleetPoller::new(
        factory,
        Arc::new(Collectors::from_config(&polling)),
        snmp,
        &polling,
    ))
}

pub fn server(id: u64, name: &str, ip: &str) -> Equipment {
    Equipment::new(id, name, ip, EquipmentKind::Server)
}

pub fn switch(id: u64, name: &str, ip: &str) -> Equipment {
    Equipment::new(id, name, ip, EquipmentKind::Switch)
}

/// Server agent with CPU counters and 8 GB of RAM, 25% free
pub fn server_agent(name: &str, user: u32, system: u32, idle: u32) -> MemoryAgent {
    MemoryAgent::new()
        .with(oids::SYS_NAME, SnmpValue::text(name))
        .with(oids::CPU_RAW_USER, SnmpValue::Counter32(user))
        .with(oids::CPU_RAW_SYSTEM, SnmpValue::Counter32(system))
        .with(oids::CPU_RAW_IDLE, SnmpValue::Counter32(idle))
        .with(oids::MEM_TOTAL_REAL, SnmpValue::Integer(8_000_000))
        .with(oids::MEM_AVAIL_REAL, SnmpValue::Integer(2_000_000))
}

pub fn set_cpu_counters(agent: &MemoryAgent, user: u32, system: u32, idle: u32) {
    agent.set(oids::oid(oids::CPU_RAW_USER), SnmpValue::Counter32(user));
    agent.set(oids::oid(oids::CPU_RAW_SYSTEM), SnmpValue::Counter32(system));
    agent.set(oids::oid(oids::CPU_RAW_IDLE), SnmpValue::Counter32(idle));
}

/// Switch agent with one interface per `(name, oper_status)`, indexed from 1
pub fn switch_agent(name: &str, interfaces: &[(&str, i64)]) -> MemoryAgent {
    let agent = MemoryAgent::new().with(oids::SYS_NAME, SnmpValue::text(name));
    for (position, (descr, oper)) in interfaces.iter().enumerate() {
        let index = position as u32 + 1;
        agent.set_row(oids::IF_INDEX, index, SnmpValue::Integer(i64::from(index)));
        agent.set_row(oids::IF_DESCR, index, SnmpValue::text(descr));
        agent.set_row(oids::IF_ADMIN_STATUS, index, SnmpValue::Integer(1));
        agent.set_row(oids::IF_OPER_STATUS, index, SnmpValue::Integer(*oper));
        agent.set_row(oids::IF_SPEED, index, SnmpValue::Gauge32(100_000_000));
        agent.set_row(oids::IF_IN_OCTETS, index, SnmpValue::Counter32(500 * index));
        agent.set_row(oids::IF_OUT_OCTETS, index, SnmpValue::Counter32(700 * index));
        agent.set_row(oids::IF_IN_ERRORS, index, SnmpValue::Counter32(0));
        agent.set_row(oids::IF_OUT_ERRORS, index, SnmpValue::Counter32(0));
    }
    agent
}

pub fn server_metrics(name: &str, cpu: f64) -> DeviceMetrics {
    DeviceMetrics::Server(ServerMetrics {
        system_name: name.to_string(),
        cpu_percent: Some(cpu),
        memory: Some(MemoryInformation::from_kb(1000, 500)),
        disk: DiskInformation::from_bytes("/", 1000, 250),
        errors: FieldErrors::new(),
        collected_at: Utc::now(),
    })
}

/// A minimal SNMP agent answering on a loopback UDP port
pub struct LoopbackAgent {
    pub port: u16,

    /// Requests received so far, dropped ones included
    pub requests: Arc<AtomicUsize>,

    task: JoinHandle<()>,
}

impl Drop for LoopbackAgent {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serve `tree` for `community`; the first `drop_first` requests go unanswered
pub async fn spawn_loopback_agent(
    community: &str,
    tree: BTreeMap<Oid, SnmpValue>,
    drop_first: usize,
) -> LoopbackAgent {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);
    let community = community.as_bytes().to_vec();

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let seen = counter.fetch_add(1, Ordering::SeqCst);
            if seen < drop_first {
                continue;
            }

            let Ok(request) = Message::decode(&buf[..len]) else {
                continue;
            };
            if request.community != community {
                continue;
            }

            let varbinds = request
                .pdu
                .varbinds
                .iter()
                .map(|(oid, _)| answer(&tree, request.pdu.pdu_type, oid))
                .collect();
            let response = Message {
                version: request.version,
                community: request.community.clone(),
                pdu: Pdu {
                    pdu_type: PduType::Response,
                    request_id: request.pdu.request_id,
                    error_status: 0,
                    error_index: 0,
                    varbinds,
                },
            };
            let _ = socket.send_to(&response.encode(), peer).await;
        }
    });

    LoopbackAgent { port, requests, task }
}

fn answer(tree: &BTreeMap<Oid, SnmpValue>, pdu_type: PduType, oid: &Oid) -> (Oid, SnmpValue) {
    match pdu_type {
        PduType::GetNextRequest => tree
            .range((Bound::Excluded(oid.clone()), Bound::Unbounded))
            .next()
            .map(|(next, value)| (next.clone(), value.clone()))
            .unwrap_or_else(|| (oid.clone(), SnmpValue::EndOfMibView)),
        _ => (
            oid.clone(),
            tree.get(oid).cloned().unwrap_or(SnmpValue::NoSuchObject),
        ),
    }
}

pub fn loopback_snmp(port: u16, timeout_ms: u64, retries: u32) -> SnmpConfig {
    SnmpConfig {
        port,
        timeout_ms,
        retries,
    }
}
