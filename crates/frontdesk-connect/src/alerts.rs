//! Operator alerting.
//!
//! Alerts are best-effort by contract: callers log a failure and move on,
//! they never fail a call because an alert did not land.

use crate::error::ConnectError;
use async_trait::async_trait;
use serde_json::{json, Value};

#[async_trait]
pub trait AlertApi: Send + Sync {
    /// Delivers one alert event with structured context.
    async fn notify(&self, event: &str, context: &Value) -> Result<(), ConnectError>;
}

/// Posts alerts as JSON to a configured webhook (Slack-style incoming hook).
#[derive(Clone)]
pub struct WebhookAlerts {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookAlerts {
    pub fn new(client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl AlertApi for WebhookAlerts {
    async fn notify(&self, event: &str, context: &Value) -> Result<(), ConnectError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "event": event, "context": context }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConnectError::from_response("alerts", response).await);
        }
        Ok(())
    }
}
