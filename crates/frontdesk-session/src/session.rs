//! The per-call session record.

use chrono::{DateTime, Utc};
use frontdesk_types::{
    Booking, CallStage, ContactInfo, ProblemReport, ServiceAddress, SlotProposal, SmsConsent,
    TransitionRecord,
};
use std::time::Instant;

/// One active call: identity, workflow state, collected fields, bookkeeping.
///
/// Sessions are exclusively owned by the [`crate::SessionStore`]; the state
/// machine and dispatch pipeline receive a reference and mutate in place,
/// never holding it beyond the current operation.
#[derive(Debug)]
pub struct CallSession {
    /// Telephony call identifier (unique per call).
    pub call_sid: String,
    /// Media stream identifier, once the stream start frame arrives.
    pub stream_sid: Option<String>,
    /// Caller phone number in E.164, when the carrier provides it.
    pub caller: Option<String>,

    /// Current workflow stage.
    pub stage: CallStage,

    // Fields collected per stage.
    pub contact: Option<ContactInfo>,
    pub address: Option<ServiceAddress>,
    pub problem: Option<ProblemReport>,
    pub proposed_slots: Vec<SlotProposal>,
    pub booking: Option<Booking>,
    pub consent: Option<SmsConsent>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic liveness marker used for TTL expiry.
    pub last_seen: Instant,

    /// Append-only audit log of stage transitions.
    pub audit: Vec<TransitionRecord>,
}

impl CallSession {
    /// Creates a session already driven into the initial `CallStarted`
    /// stage, with the initial transition on the audit log.
    pub fn new(call_sid: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            call_sid: call_sid.into(),
            stream_sid: None,
            caller: None,
            stage: CallStage::CallStarted,
            contact: None,
            address: None,
            problem: None,
            proposed_slots: Vec::new(),
            booking: None,
            consent: None,
            created_at: now,
            updated_at: now,
            last_seen: Instant::now(),
            audit: vec![TransitionRecord {
                at: now,
                from: None,
                to: CallStage::CallStarted,
                reason: "stream_start".to_string(),
            }],
        }
    }

    /// Refreshes the liveness marker without touching workflow state.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// How long the session has been idle.
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_seen.elapsed()
    }
}
