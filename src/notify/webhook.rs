use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use super::{DeliveryReport, NotificationBatch, Notifier};
use crate::alerts::Alert;
use crate::config::Webhook;

/// Generic JSON webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook: Webhook,
}

impl WebhookNotifier {
    pub fn new(webhook: Webhook) -> Self {
        Self {
            client: Client::new(),
            webhook,
        }
    }

    fn summary(batches: &[NotificationBatch]) -> String {
        let total: usize = batches.iter().map(|batch| batch.alerts.len()).sum();
        format!(
            "🚨 **Alertes Critiques SNMP**: {} alerte(s) sur {} période(s)",
            total,
            batches.len()
        )
    }

    #[instrument(skip(self, payload))]
    async fn post(&self, payload: &Value) -> Result<(), String> {
        match self.client.post(&self.webhook.url).json(payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent webhook notification");
                    Ok(())
                } else {
                    error!("Webhook notification failed with status: {}", response.status());
                    Err(format!("webhook answered {}", response.status()))
                }
            }
            Err(e) => {
                error!("Failed to send webhook notification: {}", e);
                Err(e.to_string())
            }
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_single(&self, recipient: &str, alert: &Alert) -> bool {
        let payload = json!({
            "message": format!("[{}] {}", alert.level.as_str().to_uppercase(), alert.message),
            "recipient": recipient,
            "alert": alert,
            "timestamp": Utc::now().to_rfc3339()
        });
        self.post(&payload).await.is_ok()
    }

    async fn send_grouped(&self, recipient: &str, batches: &[NotificationBatch]) -> DeliveryReport {
        let total: usize = batches.iter().map(|batch| batch.alerts.len()).sum();
        let payload = json!({
            "message": Self::summary(batches),
            "recipient": recipient,
            "groups": batches,
            "total_alerts": total,
            "timestamp": Utc::now().to_rfc3339()
        });

        match self.post(&payload).await {
            Ok(()) => DeliveryReport::delivered(format!(
                "{} alert(s) in {} group(s) sent to {}",
                total,
                batches.len(),
                recipient
            )),
            Err(e) => DeliveryReport::failed(e),
        }
    }
}
