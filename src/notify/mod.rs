//! Webhook notifier - outbound reports to the automation layer
//!
//! Posts open/close reports to a per-instrument webhook route and
//! operational notices to the system route. Delivery is best-effort:
//! failures are logged, never retried, and never block the engine.

use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::types::{now_ms, Instrument, SignalReport};

pub struct WebhookNotifier {
    client: Client,
    /// Route prefix; the instrument slug or "system" completes the URL
    base_url: String,
}

impl WebhookNotifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Deliver an open/close report for an instrument
    pub async fn send_report(&self, instrument: Instrument, report: &SignalReport) {
        let url = format!("{}{}", self.base_url, instrument.slug());
        match self.client.post(&url).json(report).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(url = %url, event = ?report.event, "✅ Report delivered");
            }
            Ok(response) => {
                tracing::warn!(url = %url, status = %response.status(), "Webhook rejected report");
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Webhook delivery failed");
            }
        }
    }

    /// Operational notice (startup health, fatal feed errors)
    pub async fn send_system(&self, level: &str, message: &str) {
        let url = format!("{}system", self.base_url);
        let payload = json!({
            "type": "SYSTEM_REPORT",
            "level": level,
            "message": message,
            "timestamp": now_ms(),
        });
        if let Err(e) = self.client.post(&url).json(&payload).send().await {
            tracing::warn!(url = %url, error = %e, "System report delivery failed");
        }
    }
}
