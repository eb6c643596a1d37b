//! Notifications for addrsync runs (Gotify, webhook, Telegram).
//!
//! Delivery is best-effort and happens after the fact: a failed
//! notification never changes the outcome of a run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::AlertsConfig;
use crate::delta::ChangeReport;
use crate::error::SyncError;
use crate::utils::{escape_markdown_v2, truncate};

/// Timeout for alert HTTP requests
const TIMEOUT_SECS: u64 = 30;

/// Telegram rejects messages over 4096 characters; leave room for escapes
const TELEGRAM_MAX_CHARS: usize = 3000;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

impl AlertLevel {
    fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Error => "ERROR",
        }
    }

    fn gotify_priority(&self) -> u8 {
        match self {
            AlertLevel::Info => 2,
            AlertLevel::Warning => 5,
            AlertLevel::Error => 8,
        }
    }
}

/// A pre-formatted notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    /// Confirmed changes on one target. Partial failures raise the level.
    pub fn change_report(target: &str, report: &ChangeReport) -> Self {
        let level = if report.has_failures() {
            AlertLevel::Warning
        } else {
            AlertLevel::Info
        };
        Self {
            level,
            title: format!("Address List Updated: {}", target),
            message: report.render(),
        }
    }

    /// A run that aborted on a target; nothing was changed there.
    pub fn sync_failed(target: &str, error: &SyncError) -> Self {
        Self {
            level: AlertLevel::Error,
            title: format!("Sync Failed: {}", target),
            message: format!("No changes were applied to {}:\n{}", target, error),
        }
    }

    /// Feeds could not be turned into a desired set; no device was contacted.
    pub fn fetch_failed(list: &str, error: &SyncError) -> Self {
        Self {
            level: AlertLevel::Error,
            title: format!("Feed Fetch Failed: {}", list),
            message: format!(
                "List '{}' was left untouched because its feeds failed:\n{}",
                list, error
            ),
        }
    }
}

/// Destination for run notifications.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notice: &Notice);
}

/// Alert manager
pub struct AlertManager {
    config: AlertsConfig,
    client: Client,
}

impl AlertManager {
    /// Create a new alert manager
    pub fn new(config: AlertsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client for alerts")?;

        Ok(Self { config, client })
    }

    /// Send an alert to all configured destinations
    pub async fn send(&self, level: AlertLevel, title: &str, message: &str) {
        let mut success_count = 0;
        let mut destinations = Vec::new();

        if self.config.gotify.enabled {
            destinations.push("Gotify");
            match self.send_gotify(level, title, message).await {
                Ok(()) => success_count += 1,
                Err(e) => warn!("Gotify alert failed: {:#}", e),
            }
        }

        if self.config.webhook.enabled {
            destinations.push("Webhook");
            match self.send_webhook(level, title, message).await {
                Ok(()) => success_count += 1,
                Err(e) => warn!("Webhook alert failed: {:#}", e),
            }
        }

        if self.config.telegram.enabled {
            destinations.push("Telegram");
            match self.send_telegram(level, title, message).await {
                Ok(()) => success_count += 1,
                Err(e) => warn!("Telegram alert failed: {:#}", e),
            }
        }

        if !destinations.is_empty() {
            debug!(
                "Alert sent to {}/{} destinations: {}",
                success_count,
                destinations.len(),
                destinations.join(", ")
            );
        }
    }

    /// Send alert via Gotify
    async fn send_gotify(&self, level: AlertLevel, title: &str, message: &str) -> Result<()> {
        let url = format!("{}/message", self.config.gotify.url.trim_end_matches('/'));

        #[derive(Serialize)]
        struct GotifyMessage<'a> {
            title: &'a str,
            message: &'a str,
            priority: u8,
        }

        let payload = GotifyMessage {
            title,
            message,
            priority: level.gotify_priority(),
        };

        // SecureString is zeroed on drop
        let token = self.config.gotify.get_token();

        let response = self
            .client
            .post(&url)
            .header("X-Gotify-Key", token.as_str())
            .json(&payload)
            .send()
            .await
            .context("Failed to send Gotify alert")?;

        if !response.status().is_success() {
            let status = response.status();
            // Don't log response body as it may contain sensitive info
            error!("Gotify alert failed with status: {}", status);
            anyhow::bail!("Gotify returned {}", status);
        }

        debug!("Gotify alert sent successfully");
        Ok(())
    }

    /// Send alert via webhook
    async fn send_webhook(&self, level: AlertLevel, title: &str, message: &str) -> Result<()> {
        #[derive(Serialize)]
        struct WebhookPayload<'a> {
            level: &'a str,
            title: &'a str,
            message: &'a str,
            timestamp: String,
            source: &'a str,
        }

        let payload = WebhookPayload {
            level: level.as_str(),
            title,
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
            source: "addrsync",
        };

        let mut request = self.client.post(&self.config.webhook.url).json(&payload);

        // Headers were validated during config deserialization
        for (key, value) in &self.config.webhook.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await.context("Failed to send webhook")?;

        if !response.status().is_success() {
            anyhow::bail!("Webhook returned {}", response.status());
        }

        debug!("Webhook alert sent successfully");
        Ok(())
    }

    /// Send alert via the Telegram Bot API (MarkdownV2)
    async fn send_telegram(&self, level: AlertLevel, title: &str, message: &str) -> Result<()> {
        #[derive(Serialize)]
        struct TelegramMessage<'a> {
            chat_id: &'a str,
            text: String,
            parse_mode: &'a str,
        }

        let telegram = &self.config.telegram;
        let token = telegram.get_token();
        let url = format!(
            "{}/bot{}/sendMessage",
            telegram.api_base.trim_end_matches('/'),
            token.as_str()
        );

        let payload = TelegramMessage {
            chat_id: &telegram.chat_id,
            text: format!(
                "*\\[{}\\] {}*\n{}",
                level.as_str(),
                escape_markdown_v2(title),
                escape_markdown_v2(&truncate(message, TELEGRAM_MAX_CHARS))
            ),
            parse_mode: "MarkdownV2",
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            // The URL embeds the token, keep it out of the error chain
            .map_err(|e| anyhow::anyhow!("Failed to send Telegram alert: {}", e.without_url()))?;

        if !response.status().is_success() {
            anyhow::bail!("Telegram returned {}", response.status());
        }

        debug!("Telegram alert sent successfully");
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for AlertManager {
    async fn notify(&self, notice: &Notice) {
        self.send(notice.level, &notice.title, &notice.message).await;
    }
}
