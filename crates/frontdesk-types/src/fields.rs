//! Structured fields collected over the course of a call.
//!
//! Each tool in the dispatch pipeline validates its payload and then fills
//! in one of these structs on the session. Field values are stored trimmed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller identity, plus the CRM ids established when the contact is synced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactInfo {
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// CRM contact id, set after a successful upsert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crm_contact_id: Option<String>,
    /// CRM deal id, set after a successful deal create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crm_deal_id: Option<String>,
}

/// The service address for the visit being scheduled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceAddress {
    pub line1: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

/// The caller's description of the problem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProblemReport {
    pub description: String,
    /// Rough urgency on a 1-5 scale, if the caller gave one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<u8>,
}

/// A candidate appointment window offered to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotProposal {
    /// Window start, RFC 3339.
    pub start: DateTime<Utc>,
    /// Window end, RFC 3339.
    pub end: DateTime<Utc>,
    /// Human-readable label spoken to the caller ("Tuesday morning, 9 to 11").
    pub label: String,
}

/// A confirmed calendar booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Recorded SMS consent state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConsent {
    pub granted: bool,
    pub recorded_at: DateTime<Utc>,
}
