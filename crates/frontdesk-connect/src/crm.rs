//! CRM client: contacts, deals, notes, consent.
//!
//! The trait is the seam the dispatch pipeline depends on; the HTTP
//! implementation targets a HubSpot-style REST surface. Tests supply mocks,
//! so nothing in core correctness rides on the exact wire shapes here.

use crate::error::ConnectError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use frontdesk_types::ContactInfo;
use serde_json::{json, Value};

#[async_trait]
pub trait CrmApi: Send + Sync {
    /// Creates or updates a contact keyed by phone number; returns the CRM
    /// contact id.
    async fn upsert_contact(&self, contact: &ContactInfo) -> Result<String, ConnectError>;

    /// Creates a deal and returns its id.
    async fn create_deal(&self, title: &str) -> Result<String, ConnectError>;

    /// Associates a deal with a contact.
    async fn associate_deal_contact(
        &self,
        deal_id: &str,
        contact_id: &str,
    ) -> Result<(), ConnectError>;

    /// Attaches a free-form note to a contact, and to its deal when one
    /// exists.
    async fn log_note(
        &self,
        contact_id: &str,
        deal_id: Option<&str>,
        body: &str,
    ) -> Result<(), ConnectError>;

    /// Moves a deal to a named pipeline stage.
    async fn update_deal_stage(&self, deal_id: &str, stage: &str) -> Result<(), ConnectError>;

    /// Records the caller's SMS consent choice on the contact, with the
    /// moment it was given.
    async fn update_consent(
        &self,
        contact_id: &str,
        granted: bool,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), ConnectError>;
}

/// HTTP-backed CRM client.
#[derive(Clone)]
pub struct HttpCrm {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpCrm {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ConnectError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConnectError::from_response("crm", response).await);
        }
        Ok(response.json().await?)
    }

    fn id_from(body: &Value) -> Result<String, ConnectError> {
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ConnectError::MalformedResponse {
                service: "crm",
                field: "id",
            })
    }
}

#[async_trait]
impl CrmApi for HttpCrm {
    async fn upsert_contact(&self, contact: &ContactInfo) -> Result<String, ConnectError> {
        let body = self
            .post(
                "/contacts/upsert",
                json!({
                    "properties": {
                        "firstname": contact.first_name,
                        "lastname": contact.last_name,
                        "phone": contact.phone,
                        "email": contact.email,
                    }
                }),
            )
            .await?;
        let id = Self::id_from(&body)?;
        tracing::debug!(contact_id = %id, "crm contact upserted");
        Ok(id)
    }

    async fn create_deal(&self, title: &str) -> Result<String, ConnectError> {
        let body = self
            .post("/deals", json!({ "properties": { "dealname": title } }))
            .await?;
        let id = Self::id_from(&body)?;
        tracing::debug!(deal_id = %id, "crm deal created");
        Ok(id)
    }

    async fn associate_deal_contact(
        &self,
        deal_id: &str,
        contact_id: &str,
    ) -> Result<(), ConnectError> {
        self.post(
            &format!("/deals/{deal_id}/associations/contacts/{contact_id}"),
            json!({}),
        )
        .await?;
        Ok(())
    }

    async fn log_note(
        &self,
        contact_id: &str,
        deal_id: Option<&str>,
        body: &str,
    ) -> Result<(), ConnectError> {
        self.post(
            "/notes",
            json!({ "contact_id": contact_id, "deal_id": deal_id, "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn update_deal_stage(&self, deal_id: &str, stage: &str) -> Result<(), ConnectError> {
        self.post(
            &format!("/deals/{deal_id}"),
            json!({ "properties": { "dealstage": stage } }),
        )
        .await?;
        Ok(())
    }

    async fn update_consent(
        &self,
        contact_id: &str,
        granted: bool,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), ConnectError> {
        self.post(
            &format!("/contacts/{contact_id}"),
            json!({ "properties": {
                "sms_consent": granted,
                "sms_consent_recorded_at": recorded_at.to_rfc3339(),
            } }),
        )
        .await?;
        Ok(())
    }
}
