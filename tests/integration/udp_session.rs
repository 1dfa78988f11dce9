//! UDP session against a loopback agent speaking the crate's own BER codec

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use snmp_supervision::DeviceMetrics;
use snmp_supervision::poller::DeviceStatus;
use snmp_supervision::snmp::udp::UdpSessionFactory;
use snmp_supervision::snmp::{Oid, SessionFactory, SessionOptions, SnmpError, SnmpValue, oids};

use crate::helpers::*;

fn tree() -> BTreeMap<Oid, SnmpValue> {
    let mut tree = BTreeMap::new();
    tree.insert(oids::oid(oids::SYS_DESCR), SnmpValue::text("Linux web-01 6.1.0"));
    tree.insert(oids::oid(oids::SYS_NAME), SnmpValue::text("web-01"));
    tree.insert(oids::oid(oids::CPU_RAW_USER), SnmpValue::Counter32(10));
    tree.insert(oids::oid(oids::CPU_RAW_SYSTEM), SnmpValue::Counter32(5));
    tree.insert(oids::oid(oids::CPU_RAW_IDLE), SnmpValue::Counter32(185));
    tree.insert(oids::oid(oids::MEM_TOTAL_REAL), SnmpValue::Integer(4_000_000));
    tree.insert(oids::oid(oids::MEM_AVAIL_REAL), SnmpValue::Integer(1_000_000));
    for (index, descr) in [(1, "lo"), (2, "eth0"), (3, "eth1")] {
        tree.insert(oids::oid(oids::IF_DESCR).child(index), SnmpValue::text(descr));
    }
    // a sibling column right after the walked one
    tree.insert(oids::oid(oids::IF_SPEED).child(1), SnmpValue::Gauge32(10_000_000));
    tree
}

fn options(port: u16, community: &str, timeout_ms: u64, retries: u32) -> SessionOptions {
    SessionOptions {
        port,
        timeout: Duration::from_millis(timeout_ms),
        retries,
        ..SessionOptions::new("127.0.0.1", community)
    }
}

#[tokio::test]
async fn test_get_scalar() {
    let agent = spawn_loopback_agent("public", tree(), 0).await;
    let session = UdpSessionFactory
        .open(&options(agent.port, "public", 500, 0))
        .await
        .unwrap();

    let value = session.get(&oids::oid(oids::SYS_NAME)).await.unwrap();
    assert_eq!(value.as_text(), "web-01");

    let idle = session.get(&oids::oid(oids::CPU_RAW_IDLE)).await.unwrap();
    assert_eq!(idle.as_u64(), Some(185));
}

#[tokio::test]
async fn test_walk_stops_at_subtree_end() {
    let agent = spawn_loopback_agent("public", tree(), 0).await;
    let session = UdpSessionFactory
        .open(&options(agent.port, "public", 500, 0))
        .await
        .unwrap();

    let rows = session.walk(&oids::oid(oids::IF_DESCR)).await.unwrap();
    let rows: Vec<(String, String)> = rows
        .into_iter()
        .map(|(suffix, value)| (suffix.to_string(), value.as_text()))
        .collect();

    assert_eq!(
        rows,
        vec![
            ("1".to_string(), "lo".to_string()),
            ("2".to_string(), "eth0".to_string()),
            ("3".to_string(), "eth1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_walk_of_absent_subtree() {
    let agent = spawn_loopback_agent("public", tree(), 0).await;
    let session = UdpSessionFactory
        .open(&options(agent.port, "public", 500, 0))
        .await
        .unwrap();

    // the next OID lies under another subtree
    let rows = session.walk(&oids::oid(oids::DOT1D_TP_FDB_ADDRESS)).await.unwrap();
    assert!(rows.is_empty());

    // nothing sorts after this one, the agent answers endOfMibView
    let rows = session.walk(&Oid::new(vec![1, 3, 6, 1, 6])).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_missing_oid_is_not_a_transport_error() {
    let agent = spawn_loopback_agent("public", tree(), 0).await;
    let session = UdpSessionFactory
        .open(&options(agent.port, "public", 500, 0))
        .await
        .unwrap();

    let err = session.get(&oids::oid(oids::HR_STORAGE_SIZE).child(36)).await.unwrap_err();
    assert_matches!(err, SnmpError::NoSuchObject(_));
    assert!(!err.is_transport());
}

#[tokio::test]
async fn test_wrong_community_times_out() {
    let agent = spawn_loopback_agent("secret", tree(), 0).await;
    let session = UdpSessionFactory
        .open(&options(agent.port, "public", 100, 1))
        .await
        .unwrap();

    let err = session.get(&oids::oid(oids::SYS_NAME)).await.unwrap_err();
    assert_matches!(err, SnmpError::Timeout { .. });
    assert!(err.is_transport());
    // one send plus one retry
    assert_eq!(agent.requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retry_recovers_dropped_request() {
    let agent = spawn_loopback_agent("public", tree(), 1).await;
    let session = UdpSessionFactory
        .open(&options(agent.port, "public", 150, 1))
        .await
        .unwrap();

    let value = session.get(&oids::oid(oids::SYS_NAME)).await.unwrap();
    assert_eq!(value.as_text(), "web-01");
    assert_eq!(agent.requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_fleet_poll_over_udp() {
    let agent = spawn_loopback_agent("public", tree(), 0).await;
    let poller = create_poller(Arc::new(UdpSessionFactory), loopback_snmp(agent.port, 500, 0));

    let statuses = poller.poll_all(&[server(1, "web-01", "127.0.0.1")]).await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, DeviceStatus::Online);

    let Some(DeviceMetrics::Server(metrics)) = &statuses[0].metrics else {
        panic!("expected server metrics, got {:?}", statuses[0].metrics);
    };
    assert_eq!(metrics.system_name, "web-01");
    assert_eq!(metrics.memory_percent(), Some(75.0));
    assert!(metrics.disk.is_empty());

    let report = poller.test_connectivity(&server(1, "web-01", "127.0.0.1")).await;
    assert!(report.online);
    assert_eq!(report.description.as_deref(), Some("Linux web-01 6.1.0"));
}

#[tokio::test]
async fn test_silent_agent_goes_offline() {
    let agent = spawn_loopback_agent("secret", tree(), 0).await;
    let poller = create_poller(Arc::new(UdpSessionFactory), loopback_snmp(agent.port, 50, 0));

    let statuses = poller.poll_all(&[server(7, "mute", "127.0.0.1")]).await;
    assert_eq!(statuses[0].status, DeviceStatus::Offline);
    assert!(statuses[0].metrics.is_none());
    assert!(statuses[0].error.is_some());
    assert!(statuses[0].last_seen.is_none());
}

#[tokio::test]
async fn test_silent_server_costs_one_timeout_per_attempt() {
    // bound but never answers
    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let poller = create_poller(Arc::new(UdpSessionFactory), loopback_snmp(port, 200, 0));

    let started = std::time::Instant::now();
    let status = poller.poll_one(&server(8, "silent", "127.0.0.1")).await;
    let elapsed = started.elapsed();

    assert_eq!(status.status, DeviceStatus::Offline);
    // two attempts of one 200ms timeout each, not one timeout per scalar
    assert!(elapsed < Duration::from_millis(1000), "took {elapsed:?}");
    drop(socket);
}
