//! Failure tests for the polling and notification pipeline
//!
//! Unreachable agents, flaky session opens, failing stores and notifier
//! endpoints must degrade one equipment or one delivery, never the actors.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snmp_supervision::actors::messages::PollEvent;
use snmp_supervision::actors::{alert::AlertHandle, poller::PollerHandle, storage::StorageHandle};
use snmp_supervision::alerts::{AlertEngine, AlertKind, AlertLevel, NewAlert};
use snmp_supervision::config::{NotificationChannel, NotificationConfig, SnmpConfig, Webhook};
use snmp_supervision::notify::{NotificationBatcher, RejectReason, WebhookNotifier};
use snmp_supervision::poller::{DeviceStatus, EquipmentStatus};
use snmp_supervision::snmp::memory::MemorySessionFactory;
use snmp_supervision::snmp::oids;
use snmp_supervision::storage::{
    AlertStore, ChartSeries, HealthStatus, MemoryBackend, MetricSample, MetricsStore, StorageError,
    StorageResult,
};
use snmp_supervision::DeviceMetrics;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

/// Metrics store whose writes always fail
struct BrokenStore;

#[async_trait]
impl MetricsStore for BrokenStore {
    async fn append(&self, _sample: MetricSample) -> StorageResult<()> {
        Err(StorageError::QueryFailed("disk full".to_string()))
    }

    async fn latest(&self, _equipment_id: u64, _limit: usize) -> StorageResult<Vec<MetricSample>> {
        Err(StorageError::QueryFailed("disk full".to_string()))
    }

    async fn query_range(
        &self,
        _equipment_id: u64,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> StorageResult<Vec<MetricSample>> {
        Err(StorageError::QueryFailed("disk full".to_string()))
    }

    async fn query_window(&self, _equipment_id: u64, _hours: u32) -> StorageResult<ChartSeries> {
        Err(StorageError::QueryFailed("disk full".to_string()))
    }

    async fn cleanup_older_than(&self, _before: DateTime<Utc>) -> StorageResult<usize> {
        Err(StorageError::QueryFailed("disk full".to_string()))
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Err(StorageError::ConnectionFailed("gone".to_string()))
    }
}

fn online_event(count: usize) -> PollEvent {
    let statuses = (1..=count as u64)
        .map(|id| {
            let name = format!("srv-{id}");
            let equipment = server(id, &name, &format!("10.0.0.{id}"));
            EquipmentStatus::online(&equipment, server_metrics(&name, 10.0), Utc::now())
        })
        .collect();
    PollEvent {
        statuses,
        started_at: Utc::now(),
        completed_at: Utc::now(),
    }
}

fn critical(message: &str) -> NewAlert {
    NewAlert {
        kind: AlertKind::Cpu,
        level: AlertLevel::Critical,
        message: message.to_string(),
        equipment_id: Some(1),
        equipment_name: "web-01".to_string(),
    }
}

fn webhook_config(url: String) -> NotificationConfig {
    NotificationConfig {
        enabled: true,
        interval_secs: 300,
        recipient: "noc".to_string(),
        channel: NotificationChannel::Webhook(Webhook { url }),
    }
}

#[tokio::test]
async fn test_refused_open_is_retried() {
    let factory = MemorySessionFactory::new();
    let agent = factory.insert("10.0.0.5", server_agent("web-01", 0, 0, 1000));
    agent.fail_next_opens(1);

    let poller = create_poller(Arc::new(factory), SnmpConfig::default());
    let status = poller.poll_one(&server(1, "web-01", "10.0.0.5")).await;

    assert_eq!(status.status, DeviceStatus::Online);
    assert_eq!(agent.open_count(), 1);
}

#[tokio::test]
async fn test_two_refused_opens_go_offline() {
    let factory = MemorySessionFactory::new();
    let agent = factory.insert("10.0.0.5", server_agent("web-01", 0, 0, 1000));
    agent.fail_next_opens(2);

    let poller = create_poller(Arc::new(factory), SnmpConfig::default());
    let status = poller.poll_one(&server(1, "web-01", "10.0.0.5")).await;

    assert_eq!(status.status, DeviceStatus::Offline);
    assert!(status.error.as_deref().is_some_and(|e| e.contains("connection refused")));
    assert_eq!(agent.open_count(), 0);
}

#[tokio::test]
async fn test_agent_going_silent_through_the_actor() {
    let factory = MemorySessionFactory::new();
    let agent = factory.insert("10.0.0.5", server_agent("web-01", 0, 0, 1000));

    let (event_tx, mut event_rx) = broadcast::channel(16);
    let handle = PollerHandle::spawn(
        create_poller(Arc::new(factory), SnmpConfig::default()),
        vec![server(1, "web-01", "10.0.0.5")],
        Duration::from_secs(3600),
        event_tx,
    );
    // let the startup cycle finish first
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = handle.poll_now().await.unwrap();
    assert_eq!(first[0].status, DeviceStatus::Online);

    agent.set_unreachable(true);
    let second = handle.poll_now().await.unwrap();
    assert_eq!(second[0].status, DeviceStatus::Offline);
    assert!(second[0].metrics.is_none());
    assert_eq!(second[0].last_seen, first[0].last_seen);

    // the cycle was still published
    let mut offline_seen = false;
    while let Ok(event) = event_rx.try_recv() {
        offline_seen |= event.online_count() == 0;
    }
    assert!(offline_seen);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_field_keeps_equipment_online() {
    let factory = MemorySessionFactory::new();
    let agent = factory.insert("10.0.0.5", server_agent("web-01", 0, 0, 1000));
    agent.fail_oid(oids::oid(oids::MEM_TOTAL_REAL));

    let poller = create_poller(Arc::new(factory), SnmpConfig::default());
    let status = poller.poll_one(&server(1, "web-01", "10.0.0.5")).await;

    assert_eq!(status.status, DeviceStatus::Online);
    let Some(DeviceMetrics::Server(metrics)) = &status.metrics else {
        panic!("expected server metrics, got {:?}", status.metrics);
    };
    assert!(metrics.errors.contains_key("mem_total"));
    assert_eq!(metrics.memory, None);
    assert_eq!(metrics.system_name, "web-01");
}

#[tokio::test]
async fn test_storage_actor_survives_write_failures() {
    let (event_tx, _) = broadcast::channel(16);
    let handle = StorageHandle::spawn(Arc::new(BrokenStore), event_tx.subscribe(), None);

    event_tx.send(online_event(3)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.cycles_seen, 1);
    assert_eq!(stats.write_failures, 3);
    assert_eq!(stats.samples_written, 0);

    // queries report the backend error instead of hanging
    assert!(handle.query_latest(1, 10).await.is_err());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_storage_actor_survives_lag() {
    let store = Arc::new(MemoryBackend::new());
    let (event_tx, _) = broadcast::channel(1);
    let handle = StorageHandle::spawn(store.clone(), event_tx.subscribe(), None);

    // the actor has not run yet, so all but the newest cycle are skipped
    for _ in 0..5 {
        event_tx.send(online_event(1)).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.cycles_seen, 1);
    assert_eq!(store.latest(1, 10).await.unwrap().len(), 1);

    event_tx.send(online_event(1)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.get_stats().await.unwrap().cycles_seen, 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_storage_actor_stops_when_poller_goes_away() {
    let (event_tx, event_rx) = broadcast::channel::<PollEvent>(16);
    let handle = StorageHandle::spawn(Arc::new(MemoryBackend::new()), event_rx, None);

    drop(event_tx);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(handle.get_stats().await.is_none());
}

#[tokio::test]
async fn test_webhook_failure_keeps_alerts_pending() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let config = webhook_config(format!("{}/hook", mock_server.uri()));
    let store = Arc::new(MemoryBackend::new());
    let notifier = Arc::new(WebhookNotifier::new(Webhook {
        url: format!("{}/hook", mock_server.uri()),
    }));
    let batcher = NotificationBatcher::new(store.clone(), notifier, &config);

    store.append_alert(critical("CPU > 90% sur web-01"), Utc::now()).await.unwrap();

    let outcome = batcher.try_send().await;
    assert_matches!(outcome.rejection(), Some(RejectReason::Delivery(_)));
    assert_eq!(store.pending_notifications().await.unwrap().len(), 1);
    assert!(batcher.last_sent().await.is_none());

    // endpoint recovers, the window never opened so the retry goes out at once
    mock_server.reset().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let outcome = batcher.try_send().await;
    assert!(outcome.is_accepted());
    assert!(store.pending_notifications().await.unwrap().is_empty());
    assert!(store.list_alerts().await.unwrap()[0].email_sent);
}

#[tokio::test]
async fn test_unreachable_webhook_is_a_failed_delivery() {
    // nothing listens on port 9 of the loopback
    let config = webhook_config("http://127.0.0.1:9/hook".to_string());
    let store = Arc::new(MemoryBackend::new());
    let notifier = Arc::new(WebhookNotifier::new(Webhook {
        url: "http://127.0.0.1:9/hook".to_string(),
    }));
    let batcher = NotificationBatcher::new(store.clone(), notifier, &config);

    store.append_alert(critical("RAM > 90% sur web-01"), Utc::now()).await.unwrap();

    let outcome = batcher.try_send().await;
    assert_matches!(outcome.rejection(), Some(RejectReason::Delivery(_)));
    assert_eq!(store.pending_notifications().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_handles_fail_after_shutdown() {
    let store = Arc::new(MemoryBackend::new());
    let config = NotificationConfig::default();
    let batcher = Arc::new(NotificationBatcher::new(
        store.clone(),
        Arc::new(snmp_supervision::notify::LogNotifier),
        &config,
    ));

    let (event_tx, _) = broadcast::channel(16);
    let alerts = AlertHandle::spawn(
        AlertEngine::new(),
        store,
        batcher,
        event_tx.subscribe(),
        Duration::from_secs(300),
    );

    alerts.shutdown().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(alerts.try_send().await.is_err());
    assert!(alerts.get_stats().await.is_err());
}
