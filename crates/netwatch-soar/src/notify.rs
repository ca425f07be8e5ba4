//! Outbound Notifications
//!
//! Webhook delivery for the notify step. The POST carries the triggering
//! event, a priority hint and a source tag; a short timeout keeps a dead
//! endpoint from stalling the worker.

use async_trait::async_trait;
use netwatch_common::{Notifier, ThreatEvent};
use serde_json::json;
use std::time::Duration;

/// Webhook-backed notifier
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &ThreatEvent, priority: &str) -> anyhow::Result<()> {
        let payload = json!({
            "alert": event,
            "priority": priority,
            "timestamp": event.timestamp,
            "source": "netwatch-soar",
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("webhook returned {}", response.status());
        }
        Ok(())
    }
}
