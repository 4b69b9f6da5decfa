//! Outbound SMS via the Twilio Messages API.

use crate::error::ConnectError;
use async_trait::async_trait;
use serde_json::Value;

/// Proof of an accepted send.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SmsReceipt {
    pub message_id: String,
}

#[async_trait]
pub trait SmsApi: Send + Sync {
    /// Sends one SMS; returns the provider message id.
    async fn send_sms(&self, to: &str, body: &str) -> Result<SmsReceipt, ConnectError>;
}

/// Twilio-backed SMS client.
#[derive(Clone)]
pub struct TwilioSms {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from: String,
}

impl TwilioSms {
    pub fn new(
        client: reqwest::Client,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            client,
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl SmsApi for TwilioSms {
    async fn send_sms(&self, to: &str, body: &str) -> Result<SmsReceipt, ConnectError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let response = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from.as_str()), ("Body", body)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConnectError::from_response("sms", response).await);
        }

        let message: Value = response.json().await?;
        let message_id = message
            .get("sid")
            .and_then(Value::as_str)
            .ok_or(ConnectError::MalformedResponse {
                service: "sms",
                field: "sid",
            })?
            .to_string();

        tracing::info!(message_id = %message_id, to, "sms accepted");
        Ok(SmsReceipt { message_id })
    }
}
