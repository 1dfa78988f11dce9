use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use super::{DeliveryReport, NotificationBatch, Notifier};
use crate::alerts::{Alert, AlertLevel};
use crate::config::Discord;

/// Discord rejects messages with more embeds than this
const MAX_EMBEDS: usize = 10;

/// Discord caps embed fields per embed
const MAX_FIELDS: usize = 25;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

fn level_color(level: AlertLevel) -> u32 {
    match level {
        AlertLevel::Critical => 15158332, // Red
        AlertLevel::Error => 15105570,    // Orange
        AlertLevel::Warning => 16776960,  // Yellow
        AlertLevel::Info => 5793266,      // Light blue
    }
}

fn level_emoji(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::Critical => "🔴",
        AlertLevel::Error => "🟠",
        AlertLevel::Warning => "🟡",
        AlertLevel::Info => "🔵",
    }
}

fn alert_field(alert: &Alert) -> EmbedField {
    EmbedField {
        name: format!(
            "{} {} ~ {}",
            level_emoji(alert.level),
            alert.level.as_str().to_uppercase(),
            alert.equipment_name
        ),
        value: format!("{}\n⏰ {}", alert.message, alert.created_at.format("%d/%m/%Y %H:%M:%S")),
        inline: false,
    }
}

/// One embed per bucket, colored by its worst alert
pub fn build_batch_embed(batch: &NotificationBatch) -> Embed {
    let worst = batch
        .alerts
        .iter()
        .map(|alert| alert.level)
        .max()
        .unwrap_or(AlertLevel::Info);

    let mut fields: Vec<EmbedField> = batch.alerts.iter().take(MAX_FIELDS).map(alert_field).collect();
    let hidden = batch.alerts.len().saturating_sub(MAX_FIELDS);
    if hidden > 0 {
        // keep room for the overflow note
        fields.truncate(MAX_FIELDS - 1);
        fields.push(EmbedField {
            name: "…".to_string(),
            value: format!("{} autre(s) alerte(s)", hidden + 1),
            inline: false,
        });
    }

    Embed {
        title: Some(format!(
            "📅 Période: {}",
            batch.bucket.format("%d/%m/%Y à %H:%M")
        )),
        description: Some(format!("{} alerte(s)", batch.alerts.len())),
        color: Some(level_color(worst)),
        fields,
        footer: Some(EmbedFooter {
            text: "SNMP Supervision".to_string(),
        }),
        timestamp: Some(batch.bucket.to_rfc3339()),
    }
}

pub fn build_single_embed(alert: &Alert) -> Embed {
    Embed {
        title: Some(format!("{} {}", level_emoji(alert.level), alert.kind)),
        description: Some(alert.message.clone()),
        color: Some(level_color(alert.level)),
        fields: vec![EmbedField {
            name: "🖥️ Équipement".to_string(),
            value: alert.equipment_name.clone(),
            inline: true,
        }],
        footer: Some(EmbedFooter {
            text: "SNMP Supervision".to_string(),
        }),
        timestamp: Some(Utc::now().to_rfc3339()),
    }
}

#[derive(Debug, Clone)]
pub struct DiscordNotifier {
    client: Client,
    discord: Discord,
}

impl DiscordNotifier {
    pub fn new(discord: Discord) -> Self {
        Self {
            client: Client::new(),
            discord,
        }
    }

    fn mention(&self, text: String) -> String {
        match &self.discord.user_id {
            Some(user_id) => format!("{text} <@{user_id}>"),
            None => text,
        }
    }

    pub fn build_grouped_message(&self, batches: &[NotificationBatch]) -> Message {
        let total: usize = batches.iter().map(|batch| batch.alerts.len()).sum();
        let mut header = format!("🚨 Alertes Critiques SNMP ({total})");
        if batches.len() > MAX_EMBEDS {
            header.push_str(&format!(
                ", {} période(s) les plus anciennes omises",
                batches.len() - MAX_EMBEDS
            ));
        }

        // newest buckets win when there are too many
        let skip = batches.len().saturating_sub(MAX_EMBEDS);
        batches
            .iter()
            .skip(skip)
            .fold(MessageBuilder::new(), |builder, batch| {
                builder.add_embed(build_batch_embed(batch))
            })
            .content(self.mention(header))
            .build()
    }

    #[instrument(skip(self, message))]
    async fn send_message(&self, message: &Message) -> Result<(), String> {
        match self.client.post(&self.discord.url).json(message).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent Discord message");
                    Ok(())
                } else {
                    let status = response.status();
                    error!("Discord message failed with status: {}", status);
                    if let Ok(error_text) = response.text().await {
                        error!("Discord API error response: {}", error_text);
                    }
                    Err(format!("discord answered {status}"))
                }
            }
            Err(e) => {
                error!("Failed to send Discord message: {}", e);
                Err(e.to_string())
            }
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send_single(&self, _recipient: &str, alert: &Alert) -> bool {
        let message = MessageBuilder::new()
            .add_embed(build_single_embed(alert))
            .content(self.mention(format!("{} {}", level_emoji(alert.level), alert.equipment_name)))
            .build();
        self.send_message(&message).await.is_ok()
    }

    async fn send_grouped(&self, _recipient: &str, batches: &[NotificationBatch]) -> DeliveryReport {
        let message = self.build_grouped_message(batches);
        match self.send_message(&message).await {
            Ok(()) => DeliveryReport::delivered(format!(
                "{} group(s) posted to Discord",
                message.embeds.len()
            )),
            Err(e) => DeliveryReport::failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertKind, NewAlert};
    use crate::notify::group_by_bucket;
    use chrono::{Duration, TimeZone};
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert(id: u64, level: AlertLevel, minutes: i64) -> Alert {
        let base = Utc.with_ymd_and_hms(2026, 3, 14, 8, 0, 0).unwrap();
        Alert::from_new(
            id,
            NewAlert {
                kind: AlertKind::Cpu,
                level,
                message: format!("CPU > 90% sur srv-{id}"),
                equipment_id: Some(id),
                equipment_name: format!("srv-{id}"),
            },
            base + Duration::minutes(minutes),
        )
    }

    fn notifier(url: String, user_id: Option<&str>) -> DiscordNotifier {
        DiscordNotifier::new(Discord {
            url,
            user_id: user_id.map(str::to_string),
        })
    }

    #[test]
    fn test_embed_per_bucket_colored_by_worst_level() {
        let batches = group_by_bucket(vec![
            alert(1, AlertLevel::Error, 1),
            alert(2, AlertLevel::Critical, 2),
            alert(3, AlertLevel::Error, 6),
        ]);
        let message = notifier("http://unused".to_string(), Some("42")).build_grouped_message(&batches);

        assert_eq!(message.embeds.len(), 2);
        assert_eq!(message.embeds[0].color, Some(15158332));
        assert_eq!(message.embeds[0].fields.len(), 2);
        assert_eq!(message.embeds[1].color, Some(15105570));
        assert_eq!(message.content.as_deref(), Some("🚨 Alertes Critiques SNMP (3) <@42>"));
    }

    #[test]
    fn test_embed_limits() {
        let many: Vec<Alert> = (0..30).map(|i| alert(i, AlertLevel::Critical, 0)).collect();
        let batches = group_by_bucket(many);
        let embed = build_batch_embed(&batches[0]);
        assert_eq!(embed.fields.len(), MAX_FIELDS);
        assert_eq!(embed.fields[MAX_FIELDS - 1].value, "6 autre(s) alerte(s)");

        let spread: Vec<Alert> = (0..12).map(|i| alert(i as u64, AlertLevel::Error, i * 5)).collect();
        let message = notifier("http://unused".to_string(), None).build_grouped_message(&group_by_bucket(spread));
        assert_eq!(message.embeds.len(), MAX_EMBEDS);
        assert!(message.content.unwrap().contains("2 période(s)"));
    }

    #[tokio::test]
    async fn test_grouped_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"content": "🚨 Alertes Critiques SNMP (1)"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let report = notifier(server.uri(), None)
            .send_grouped("ops", &group_by_bucket(vec![alert(1, AlertLevel::Critical, 0)]))
            .await;
        assert!(report.success, "{}", report.detail);
    }

    #[tokio::test]
    async fn test_rejected_by_discord() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad embed"))
            .mount(&server)
            .await;

        let report = notifier(server.uri(), None)
            .send_grouped("ops", &group_by_bucket(vec![alert(1, AlertLevel::Critical, 0)]))
            .await;
        assert!(!report.success);
    }
}
