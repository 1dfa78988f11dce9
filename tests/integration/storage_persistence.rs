//! Integration tests for SQLite persistence
//!
//! These tests verify that:
//! - Poll cycles reach the database through the storage actor
//! - Samples and alerts survive a reopen of the same file
//! - Retention cleanup removes old samples only

use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use snmp_supervision::actors::messages::PollEvent;
use snmp_supervision::actors::storage::StorageHandle;
use snmp_supervision::alerts::{AlertKind, AlertLevel, NewAlert};
use snmp_supervision::config::StorageConfig;
use snmp_supervision::poller::EquipmentStatus;
use snmp_supervision::storage::sqlite::SqliteBackend;
use snmp_supervision::storage::{self, MetricSample, MetricsStore};
use tempfile::tempdir;
use tokio::sync::broadcast;

use crate::helpers::*;

fn cycle(cpu: f64) -> PollEvent {
    let equipment = server(1, "web-01", "10.0.0.5");
    PollEvent {
        statuses: vec![
            EquipmentStatus::online(&equipment, server_metrics("web-01", cpu), Utc::now()),
            EquipmentStatus::offline(
                &server(2, "gone", "10.0.0.99"),
                "device unreachable".to_string(),
                None,
            ),
        ],
        started_at: Utc::now(),
        completed_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_poll_cycles_persist_through_the_actor() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("supervision.db");
    let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());

    let (event_tx, _) = broadcast::channel(16);
    let handle = StorageHandle::spawn(backend.clone(), event_tx.subscribe(), Some(30));

    event_tx.send(cycle(12.5)).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    event_tx.send(cycle(40.0)).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.cycles_seen, 2);
    assert_eq!(stats.samples_written, 2);
    assert_eq!(stats.write_failures, 0);
    // startup cleanup ran against an empty table
    assert!(stats.last_cleanup_time.is_some());
    assert_eq!(stats.total_samples_deleted, 0);

    let latest = handle.query_latest(1, 10).await.unwrap();
    let cpu: Vec<Option<f64>> = latest.iter().map(|sample| sample.cpu_percent).collect();
    assert_eq!(cpu, vec![Some(12.5), Some(40.0)]);
    assert!(handle.query_latest(2, 10).await.unwrap().is_empty());

    let series = handle.query_window(1, 1).await.unwrap();
    assert_eq!(series.cpu, vec![12.5, 40.0]);

    handle.shutdown().await;
    backend.close().await;

    // a new backend on the same file sees the same history
    let reopened = SqliteBackend::new(&db_path).await.unwrap();
    assert_eq!(reopened.latest(1, 10).await.unwrap().len(), 2);
    reopened.close().await;
}

#[tokio::test]
async fn test_retention_cleanup_through_the_actor() {
    let temp_dir = tempdir().unwrap();
    let backend = Arc::new(SqliteBackend::new(temp_dir.path().join("retention.db")).await.unwrap());

    let old = Utc::now() - Duration::days(35);
    let recent = Utc::now() - Duration::hours(1);
    backend
        .append(MetricSample::new(1, old, server_metrics("web-01", 5.0)))
        .await
        .unwrap();
    backend
        .append(MetricSample::new(1, recent, server_metrics("web-01", 6.0)))
        .await
        .unwrap();

    let (event_tx, _) = broadcast::channel::<PollEvent>(16);
    let handle = StorageHandle::spawn(backend.clone(), event_tx.subscribe(), Some(30));
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    // startup cleanup already removed the 35 day old sample
    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.total_samples_deleted, 1);

    let remaining = backend.latest(1, 10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].timestamp > Utc::now() - Duration::days(30));

    // nothing left to delete on demand
    assert_eq!(handle.cleanup().await.unwrap(), 0);

    handle.shutdown().await;
    backend.close().await;
}

#[tokio::test]
async fn test_ring_capacity_is_per_equipment() {
    let temp_dir = tempdir().unwrap();
    let backend = SqliteBackend::with_capacity(temp_dir.path().join("ring.db"), 3)
        .await
        .unwrap();

    let start = Utc::now() - Duration::minutes(10);
    for minute in 0..5 {
        let at = start + Duration::minutes(minute);
        backend
            .append(MetricSample::new(1, at, server_metrics("web-01", minute as f64)))
            .await
            .unwrap();
    }
    backend
        .append(MetricSample::new(2, start, server_metrics("db-01", 1.0)))
        .await
        .unwrap();

    let kept: Vec<Option<f64>> = backend
        .latest(1, 10)
        .await
        .unwrap()
        .iter()
        .map(|sample| sample.cpu_percent)
        .collect();
    assert_eq!(kept, vec![Some(2.0), Some(3.0), Some(4.0)]);
    assert_eq!(backend.latest(2, 10).await.unwrap().len(), 1);

    backend.close().await;
}

#[tokio::test]
async fn test_alerts_survive_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("alerts.db");
    let config = StorageConfig::Sqlite {
        path: db_path.clone(),
        retention_days: 30,
    };

    let store = storage::open(&config).await.unwrap();
    let now = Utc::now();
    let cpu = store
        .append_alert(
            NewAlert {
                kind: AlertKind::Cpu,
                level: AlertLevel::Critical,
                message: "CPU > 90% sur web-01".to_string(),
                equipment_id: Some(1),
                equipment_name: "web-01".to_string(),
            },
            now,
        )
        .await
        .unwrap();
    let interface = store
        .append_alert(
            NewAlert {
                kind: AlertKind::Interface,
                level: AlertLevel::Info,
                message: "Interface Gi0/2 DOWN sur sw-core".to_string(),
                equipment_id: Some(3),
                equipment_name: "sw-core".to_string(),
            },
            now,
        )
        .await
        .unwrap();
    store.mark_sent(&[cpu.id], now).await.unwrap();
    store.acknowledge(interface.id, now).await.unwrap();
    drop(store);

    let reopened = storage::open(&config).await.unwrap();
    let alerts = reopened.list_alerts().await.unwrap();
    assert_eq!(alerts.len(), 2);

    let cpu = reopened.get_alert(cpu.id).await.unwrap().unwrap();
    assert!(cpu.email_sent);
    assert!(cpu.email_sent_at.is_some());

    let interface = reopened.get_alert(interface.id).await.unwrap().unwrap();
    assert!(interface.acknowledged);
    assert!(!interface.resolved);

    assert!(reopened.pending_notifications().await.unwrap().is_empty());

    let stats = reopened.alert_stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.critical, 1);
}
