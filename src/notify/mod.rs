//! Batched, rate-limited alert notifications
//!
//! [`NotificationBatcher::try_send`] picks every undelivered error/critical
//! alert, groups them by 5-minute creation bucket and hands all buckets to a
//! [`Notifier`] in one delivery. Alerts are marked sent only after the
//! notifier confirms; a failed delivery leaves them pending for the next try.

pub mod discord;
pub mod webhook;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::{Alert, AlertKind, AlertLevel, NewAlert};
use crate::config::{NotificationChannel, NotificationConfig};
use crate::storage::AlertStore;

pub use discord::DiscordNotifier;
pub use webhook::WebhookNotifier;

/// Width of a notification bucket
pub const BUCKET_MINUTES: i64 = 5;

/// Alerts created in the same 5-minute window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationBatch {
    /// Creation time floored to the bucket boundary
    pub bucket: DateTime<Utc>,
    pub alerts: Vec<Alert>,
}

/// What a notifier reports back for a grouped delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub success: bool,
    pub detail: String,
}

impl DeliveryReport {
    pub fn delivered(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Delivery channel for alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert; `true` on confirmed delivery
    async fn send_single(&self, recipient: &str, alert: &Alert) -> bool;

    /// Deliver every bucket as one notification
    async fn send_grouped(&self, recipient: &str, batches: &[NotificationBatch]) -> DeliveryReport;
}

/// Writes notifications to the log and always succeeds
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_single(&self, recipient: &str, alert: &Alert) -> bool {
        info!(recipient, level = %alert.level, equipment = %alert.equipment_name, "{}", alert.message);
        true
    }

    async fn send_grouped(&self, recipient: &str, batches: &[NotificationBatch]) -> DeliveryReport {
        for batch in batches {
            for alert in &batch.alerts {
                warn!(
                    recipient,
                    bucket = %batch.bucket.format("%d/%m/%Y %H:%M"),
                    level = %alert.level,
                    equipment = %alert.equipment_name,
                    "{}", alert.message
                );
            }
        }
        DeliveryReport::delivered(format!("{} group(s) written to the log", batches.len()))
    }
}

/// Notifier for the configured channel
pub fn notifier_for(channel: &NotificationChannel) -> Arc<dyn Notifier> {
    match channel {
        NotificationChannel::Discord(discord) => Arc::new(DiscordNotifier::new(discord.clone())),
        NotificationChannel::Webhook(webhook) => Arc::new(WebhookNotifier::new(webhook.clone())),
        NotificationChannel::Log => Arc::new(LogNotifier),
    }
}

/// Floor a timestamp to its 5-minute bucket
pub fn bucket_of(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(TimeDelta::minutes(BUCKET_MINUTES))
        .unwrap_or(timestamp)
}

/// Group alerts by bucket, oldest bucket first
pub fn group_by_bucket(alerts: Vec<Alert>) -> Vec<NotificationBatch> {
    let mut buckets: BTreeMap<DateTime<Utc>, Vec<Alert>> = BTreeMap::new();
    for alert in alerts {
        buckets.entry(bucket_of(alert.created_at)).or_default().push(alert);
    }
    buckets
        .into_iter()
        .map(|(bucket, alerts)| NotificationBatch { bucket, alerts })
        .collect()
}

/// Why a send attempt did not go out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Disabled,
    Muted,
    NoPending,
    TooEarly { remaining_secs: u64 },
    Store(String),
    Delivery(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Disabled => write!(f, "notifications are disabled"),
            RejectReason::Muted => write!(f, "notifications are muted"),
            RejectReason::NoPending => write!(f, "no critical/error alert pending"),
            RejectReason::TooEarly { remaining_secs } => {
                write!(f, "too early to send (wait {remaining_secs}s)")
            }
            RejectReason::Store(msg) => write!(f, "alert store failure: {msg}"),
            RejectReason::Delivery(msg) => write!(f, "delivery failed: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendSummary {
    pub groups: usize,
    pub alerts: usize,
    pub recipient: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted(SendSummary),
    Rejected(RejectReason),
}

impl SendOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SendOutcome::Accepted(_))
    }

    pub fn rejection(&self) -> Option<&RejectReason> {
        match self {
            SendOutcome::Accepted(_) => None,
            SendOutcome::Rejected(reason) => Some(reason),
        }
    }
}

pub struct NotificationBatcher {
    store: Arc<dyn AlertStore>,
    notifier: Arc<dyn Notifier>,
    recipient: String,
    enabled: AtomicBool,
    muted: AtomicBool,
    interval_secs: AtomicU64,

    /// Time of the last confirmed delivery; held for the whole attempt so
    /// two callers never send the same alerts
    last_sent: Mutex<Option<DateTime<Utc>>>,
}

impl NotificationBatcher {
    pub fn new(
        store: Arc<dyn AlertStore>,
        notifier: Arc<dyn Notifier>,
        config: &NotificationConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            recipient: config.recipient.clone(),
            enabled: AtomicBool::new(config.enabled),
            muted: AtomicBool::new(false),
            interval_secs: AtomicU64::new(config.interval_secs),
            last_sent: Mutex::new(None),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Suppress sends without touching the pending alerts
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn set_interval(&self, interval: Duration) {
        self.interval_secs.store(interval.as_secs(), Ordering::SeqCst);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.load(Ordering::SeqCst))
    }

    pub async fn last_sent(&self) -> Option<DateTime<Utc>> {
        *self.last_sent.lock().await
    }

    pub async fn try_send(&self) -> SendOutcome {
        self.try_send_at(Utc::now()).await
    }

    /// Send every pending alert as of `now`
    #[instrument(skip(self), fields(recipient = %self.recipient))]
    pub async fn try_send_at(&self, now: DateTime<Utc>) -> SendOutcome {
        if !self.enabled.load(Ordering::SeqCst) {
            return SendOutcome::Rejected(RejectReason::Disabled);
        }
        if self.is_muted() {
            return SendOutcome::Rejected(RejectReason::Muted);
        }

        let mut last_sent = self.last_sent.lock().await;

        let pending = match self.store.pending_notifications().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("could not load pending alerts: {e}");
                return SendOutcome::Rejected(RejectReason::Store(e.to_string()));
            }
        };
        let pending: Vec<Alert> = pending
            .into_iter()
            .filter(Alert::is_pending_notification)
            .collect();
        if pending.is_empty() {
            return SendOutcome::Rejected(RejectReason::NoPending);
        }

        if let Some(remaining_secs) = self.remaining(*last_sent, now) {
            debug!(remaining_secs, "send window still closed");
            return SendOutcome::Rejected(RejectReason::TooEarly { remaining_secs });
        }

        let ids: Vec<u64> = pending.iter().map(|alert| alert.id).collect();
        let batches = group_by_bucket(pending);
        let report = self.notifier.send_grouped(&self.recipient, &batches).await;
        if !report.success {
            warn!(detail = %report.detail, "grouped notification failed, alerts stay pending");
            return SendOutcome::Rejected(RejectReason::Delivery(report.detail));
        }

        *last_sent = Some(now);
        if let Err(e) = self.store.mark_sent(&ids, now).await {
            error!("notification delivered but alerts could not be marked sent: {e}");
            return SendOutcome::Rejected(RejectReason::Store(e.to_string()));
        }

        info!(groups = batches.len(), alerts = ids.len(), "grouped notification sent");
        SendOutcome::Accepted(SendSummary {
            groups: batches.len(),
            alerts: ids.len(),
            recipient: self.recipient.clone(),
            detail: report.detail,
        })
    }

    /// Whole seconds left in the send window, rounded up
    fn remaining(&self, last_sent: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<u64> {
        let last_sent = last_sent?;
        let interval_ms = self.interval().as_millis() as i64;
        let elapsed_ms = (now - last_sent).num_milliseconds();
        let remaining_ms = interval_ms - elapsed_ms;
        (remaining_ms > 0).then(|| (remaining_ms as u64).div_ceil(1000))
    }

    /// Deliver a single info-level test alert to the recipient
    pub async fn send_test(&self) -> DeliveryReport {
        let alert = Alert::from_new(
            0,
            NewAlert {
                kind: AlertKind::Test,
                level: AlertLevel::Info,
                message: "Ceci est un test de notification".to_string(),
                equipment_id: None,
                equipment_name: "Système de test".to_string(),
            },
            Utc::now(),
        );

        if self.notifier.send_single(&self.recipient, &alert).await {
            DeliveryReport::delivered(format!("test notification sent to {}", self.recipient))
        } else {
            DeliveryReport::failed("test notification failed")
        }
    }
}
