//! Operator notifications sent at the end of a delete/recreate remediation

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info, instrument};

pub const NOTIFICATION_SUBJECT: &str = "[Connector] automatic recovery";

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message`; returns whether delivery succeeded
    async fn notify(&self, message: &str) -> bool;
}

/// Logs notifications and keeps them for later inspection
#[derive(Debug, Default)]
pub struct LogNotifier {
    sent: Mutex<Vec<String>>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> bool {
        info!("[no webhook configured] {message}");
        self.sent.lock().push(message.to_string());
        true
    }
}

/// Posts notifications as JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self))]
    async fn notify(&self, message: &str) -> bool {
        let payload = json!({
            "subject": NOTIFICATION_SUBJECT,
            "message": message,
            "timestamp": Utc::now().to_rfc3339()
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent notification");
                    true
                } else {
                    error!("Notification failed with status: {}", response.status());
                    false
                }
            }
            Err(e) => {
                error!("Failed to send notification: {}", e);
                false
            }
        }
    }
}
