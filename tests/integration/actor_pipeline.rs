//! Integration tests for the full actor pipeline
//!
//! Poller → broadcast → {Storage, Alert} → NotificationBatcher → Notifier

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use snmp_supervision::actors::{alert::AlertHandle, poller::PollerHandle, storage::StorageHandle};
use snmp_supervision::alerts::{Alert, AlertEngine, AlertKind, AlertLevel};
use snmp_supervision::config::{Equipment, NotificationChannel, NotificationConfig, SnmpConfig};
use snmp_supervision::notify::{DeliveryReport, NotificationBatch, NotificationBatcher, Notifier, RejectReason};
use snmp_supervision::poller::DeviceStatus;
use snmp_supervision::snmp::memory::MemorySessionFactory;
use snmp_supervision::storage::{AlertStore, MemoryBackend, MetricsStore};
use tokio::sync::broadcast;

use crate::helpers::*;

/// Records grouped deliveries as `(bucket count, alert count)`
#[derive(Default)]
struct CapturingNotifier {
    grouped: Mutex<Vec<(usize, usize)>>,
}

impl CapturingNotifier {
    fn deliveries(&self) -> Vec<(usize, usize)> {
        self.grouped.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send_single(&self, _recipient: &str, _alert: &Alert) -> bool {
        true
    }

    async fn send_grouped(&self, _recipient: &str, batches: &[NotificationBatch]) -> DeliveryReport {
        let alerts = batches.iter().map(|batch| batch.alerts.len()).sum();
        self.grouped.lock().unwrap().push((batches.len(), alerts));
        DeliveryReport::delivered("captured")
    }
}

struct Pipeline {
    store: Arc<MemoryBackend>,
    notifier: Arc<CapturingNotifier>,
    poller: PollerHandle,
    storage: StorageHandle,
    alerts: AlertHandle,
}

impl Pipeline {
    async fn shutdown(&self) {
        self.poller.shutdown().await.unwrap();
        self.alerts.shutdown().await;
        self.storage.shutdown().await;
    }
}

fn spawn_pipeline(factory: MemorySessionFactory, equipment: Vec<Equipment>) -> Pipeline {
    let store = Arc::new(MemoryBackend::new());
    let notifier = Arc::new(CapturingNotifier::default());
    let config = NotificationConfig {
        enabled: true,
        interval_secs: 300,
        recipient: "noc".to_string(),
        channel: NotificationChannel::Log,
    };
    let batcher = Arc::new(NotificationBatcher::new(store.clone(), notifier.clone(), &config));

    let (event_tx, _) = broadcast::channel(64);
    let storage = StorageHandle::spawn(store.clone(), event_tx.subscribe(), None);
    let alerts = AlertHandle::spawn(
        AlertEngine::new(),
        store.clone(),
        batcher,
        event_tx.subscribe(),
        Duration::from_secs(300),
    );
    let poller = PollerHandle::spawn(
        create_poller(Arc::new(factory), SnmpConfig::default()),
        equipment,
        // long enough that only the initial tick and poll_now drive cycles
        Duration::from_secs(3600),
        event_tx,
    );

    Pipeline {
        store,
        notifier,
        poller,
        storage,
        alerts,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

#[tokio::test]
async fn test_busy_server_flows_to_notification() {
    let factory = MemorySessionFactory::new();
    let agent = factory.insert("10.0.0.5", server_agent("web-01", 0, 0, 1000));
    let pipeline = spawn_pipeline(factory, vec![server(1, "web-01", "10.0.0.5")]);
    settle().await;

    // 95 of 100 new ticks were busy
    set_cpu_counters(&agent, 90, 5, 1005);
    let statuses = pipeline.poller.poll_now().await.unwrap();
    assert_eq!(statuses[0].status, DeviceStatus::Online);
    settle().await;

    let alerts = pipeline.store.list_alerts().await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Cpu);
    assert_eq!(alerts[0].level, AlertLevel::Critical);
    assert_eq!(alerts[0].message, "CPU > 90% sur web-01");
    assert_eq!(alerts[0].equipment_id, Some(1));
    assert!(alerts[0].email_sent);

    assert_eq!(pipeline.notifier.deliveries(), vec![(1, 1)]);

    // both cycles were stored
    let samples = pipeline.store.latest(1, 10).await.unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1].cpu_percent, Some(95.0));

    let stats = pipeline.storage.get_stats().await.unwrap();
    assert_eq!(stats.samples_written, 2);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_throttled_alerts_wait_for_the_window() {
    let factory = MemorySessionFactory::new();
    let agent = factory.insert("10.0.0.5", server_agent("web-01", 0, 0, 1000));
    let pipeline = spawn_pipeline(factory, vec![server(1, "web-01", "10.0.0.5")]);
    settle().await;

    set_cpu_counters(&agent, 95, 0, 1005);
    pipeline.poller.poll_now().await.unwrap();
    settle().await;

    set_cpu_counters(&agent, 190, 0, 1010);
    pipeline.poller.poll_now().await.unwrap();
    settle().await;

    // one delivery, the second alert stays pending and is not dropped
    assert_eq!(pipeline.notifier.deliveries().len(), 1);
    let pending = pipeline.store.pending_notifications().await.unwrap();
    assert_eq!(pending.len(), 1);

    let outcome = pipeline.alerts.try_send().await.unwrap();
    match outcome.rejection() {
        Some(RejectReason::TooEarly { remaining_secs }) => {
            assert!(*remaining_secs > 290 && *remaining_secs <= 300);
        }
        other => panic!("expected TooEarly, got {other:?}"),
    }

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_interface_down_is_informational() {
    let factory = MemorySessionFactory::new();
    factory.insert(
        "10.0.1.1",
        switch_agent("sw-core", &[("Gi0/1", 1), ("Gi0/2", 2)]),
    );
    let pipeline = spawn_pipeline(factory, vec![switch(3, "sw-core", "10.0.1.1")]);
    settle().await;

    let alerts = pipeline.store.list_alerts().await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Interface);
    assert_eq!(alerts[0].level, AlertLevel::Info);
    assert_eq!(alerts[0].message, "Interface Gi0/2 DOWN sur sw-core");

    // info alerts are never notified
    assert!(pipeline.store.pending_notifications().await.unwrap().is_empty());
    assert!(pipeline.notifier.deliveries().is_empty());

    let series = pipeline.storage.query_window(3, 1).await.unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series.interfaces[0].len(), 2);
    assert_eq!(series.traffic_in, vec![500 + 1000]);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_mixed_fleet_cycle() {
    let factory = MemorySessionFactory::new();
    factory.insert("10.0.0.5", server_agent("web-01", 0, 0, 1000));
    factory.insert("10.0.1.1", switch_agent("sw-core", &[("Gi0/1", 1)]));
    let equipment = vec![
        server(1, "web-01", "10.0.0.5"),
        switch(2, "sw-core", "10.0.1.1"),
        server(3, "gone", "10.0.0.99"),
    ];
    let pipeline = spawn_pipeline(factory, equipment);

    let statuses = pipeline.poller.poll_now().await.unwrap();
    let summary: Vec<(u64, DeviceStatus)> = statuses.iter().map(|s| (s.id, s.status)).collect();
    assert_eq!(
        summary,
        vec![
            (1, DeviceStatus::Online),
            (2, DeviceStatus::Online),
            (3, DeviceStatus::Offline),
        ]
    );
    settle().await;

    // healthy devices, no alert; the offline one has no samples
    assert!(pipeline.store.list_alerts().await.unwrap().is_empty());
    assert!(pipeline.store.latest(3, 10).await.unwrap().is_empty());
    assert!(!pipeline.store.latest(2, 10).await.unwrap().is_empty());

    pipeline.shutdown().await;
}
