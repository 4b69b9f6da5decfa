//! End-to-end dispatch pipeline tests with in-memory collaborators.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use frontdesk_connect::{AlertApi, CalendarApi, ConnectError, CrmApi, SmsApi, SmsReceipt};
use frontdesk_db::{create_pool, run_migrations, DbRuntimeSettings};
use frontdesk_idempotency::EffectExecutor;
use frontdesk_session::SessionStore;
use frontdesk_tools::Dispatcher;
use frontdesk_types::{Booking, CallStage, ContactInfo, SlotProposal};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// -- collaborator doubles ---------------------------------------------------

#[derive(Default)]
struct MockCrm {
    upserts: AtomicUsize,
    deals: AtomicUsize,
    notes: AtomicUsize,
    consent_updates: AtomicUsize,
    deal_stage_updates: AtomicUsize,
    /// Number of initial `upsert_contact` calls that fail before one succeeds.
    fail_first_upserts: AtomicUsize,
}

impl MockCrm {
    fn failing_upsert_once() -> Self {
        Self {
            fail_first_upserts: AtomicUsize::new(1),
            ..Self::default()
        }
    }
}

#[async_trait]
impl CrmApi for MockCrm {
    async fn upsert_contact(&self, _contact: &ContactInfo) -> Result<String, ConnectError> {
        if self
            .fail_first_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ConnectError::Config("simulated crm outage".to_string()));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok("contact-1".to_string())
    }

    async fn create_deal(&self, _title: &str) -> Result<String, ConnectError> {
        self.deals.fetch_add(1, Ordering::SeqCst);
        Ok("deal-1".to_string())
    }

    async fn associate_deal_contact(
        &self,
        _deal_id: &str,
        _contact_id: &str,
    ) -> Result<(), ConnectError> {
        Ok(())
    }

    async fn log_note(
        &self,
        _contact_id: &str,
        _deal_id: Option<&str>,
        _body: &str,
    ) -> Result<(), ConnectError> {
        self.notes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_deal_stage(&self, _deal_id: &str, _stage: &str) -> Result<(), ConnectError> {
        self.deal_stage_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_consent(
        &self,
        _contact_id: &str,
        _granted: bool,
        _recorded_at: DateTime<Utc>,
    ) -> Result<(), ConnectError> {
        self.consent_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockCalendar {
    bookings: AtomicUsize,
    /// Number of initial `book_slot` calls that fail before one succeeds.
    fail_first: AtomicUsize,
}

impl MockCalendar {
    fn new() -> Self {
        Self {
            bookings: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
        }
    }

    fn failing_once() -> Self {
        Self {
            bookings: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(1),
        }
    }

    fn fixed_slots() -> Vec<SlotProposal> {
        let day = |h| Utc.with_ymd_and_hms(2026, 3, 2, h, 0, 0).unwrap();
        (9..12)
            .map(|h| SlotProposal {
                start: day(h),
                end: day(h + 1),
                label: format!("Monday at {h}"),
            })
            .collect()
    }
}

#[async_trait]
impl CalendarApi for MockCalendar {
    async fn propose_slots(
        &self,
        _now: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<SlotProposal>, ConnectError> {
        Ok(Self::fixed_slots().into_iter().take(count).collect())
    }

    async fn book_slot(
        &self,
        slot: &SlotProposal,
        _summary: &str,
        _attendee_email: Option<&str>,
    ) -> Result<Booking, ConnectError> {
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ConnectError::Config("simulated calendar outage".to_string()));
        }
        let n = self.bookings.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Booking {
            event_id: format!("event-{n}"),
            link: None,
            start: slot.start,
            end: slot.end,
        })
    }
}

#[derive(Default)]
struct MockSms {
    sends: AtomicUsize,
}

#[async_trait]
impl SmsApi for MockSms {
    async fn send_sms(&self, _to: &str, _body: &str) -> Result<SmsReceipt, ConnectError> {
        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SmsReceipt {
            message_id: format!("sms-{n}"),
        })
    }
}

#[derive(Default)]
struct MockAlerts {
    notifies: AtomicUsize,
}

#[async_trait]
impl AlertApi for MockAlerts {
    async fn notify(&self, _event: &str, _context: &Value) -> Result<(), ConnectError> {
        self.notifies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// -- harness ----------------------------------------------------------------

struct Harness {
    dispatcher: Dispatcher,
    sessions: SessionStore,
    crm: Arc<MockCrm>,
    calendar: Arc<MockCalendar>,
    sms: Arc<MockSms>,
    alerts: Arc<MockAlerts>,
    _dir: tempfile::TempDir,
}

fn build_harness(crm: MockCrm, calendar: MockCalendar) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tools.db");
    let pool =
        create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).expect("pool");
    {
        let conn = pool.get().expect("connection");
        run_migrations(&conn).expect("migrations");
    }

    let sessions = SessionStore::new();
    let crm = Arc::new(crm);
    let calendar = Arc::new(calendar);
    let sms = Arc::new(MockSms::default());
    let alerts = Arc::new(MockAlerts::default());
    let dispatcher = Dispatcher::new(
        sessions.clone(),
        EffectExecutor::new(pool),
        crm.clone(),
        calendar.clone(),
        sms.clone(),
        alerts.clone(),
    );

    Harness {
        dispatcher,
        sessions,
        crm,
        calendar,
        sms,
        alerts,
        _dir: dir,
    }
}

fn harness_with_calendar(calendar: MockCalendar) -> Harness {
    build_harness(MockCrm::default(), calendar)
}

fn harness_with_crm(crm: MockCrm) -> Harness {
    build_harness(crm, MockCalendar::new())
}

fn harness() -> Harness {
    build_harness(MockCrm::default(), MockCalendar::new())
}

const SID: &str = "CA-test";

impl Harness {
    async fn start_call(&self) {
        self.sessions.create(SID).await;
    }

    /// Runs the happy path up to and including slot proposal.
    async fn drive_to_scheduling(&self) {
        self.start_call().await;
        for (tool, payload) in [
            (
                "capture_identity",
                json!({"first_name": "Ada", "last_name": "Lovelace", "phone": "+15550001111"}),
            ),
            (
                "confirm_address",
                json!({"line1": "1 Main St", "city": "Springfield", "state": "IL",
                       "postal_code": "62701"}),
            ),
            ("capture_problem", json!({"description": "water heater leaking", "urgency": 4})),
            ("propose_slots", json!({"count": 3})),
        ] {
            let result = self.dispatcher.dispatch(SID, tool, payload).await;
            assert!(result.ok, "{tool} should succeed: {:?}", result.error);
        }
    }

    async fn drive_to_booked(&self) -> Value {
        self.drive_to_scheduling().await;
        let slot = MockCalendar::fixed_slots()[0].start.to_rfc3339();
        let result = self
            .dispatcher
            .dispatch(SID, "book_estimate", json!({"slot_start": slot}))
            .await;
        assert!(result.ok, "book_estimate should succeed: {:?}", result.error);
        result.data.expect("booking data")
    }
}

// -- tests ------------------------------------------------------------------

#[tokio::test]
async fn unknown_and_unimplemented_tools() {
    let h = harness();
    h.start_call().await;

    let result = h.dispatcher.dispatch(SID, "transfer_funds", json!({})).await;
    assert_eq!(result.error_code().map(|c| c.as_str()), Some("invalid_tool"));

    let result = h.dispatcher.dispatch(SID, "handle_payment", json!({})).await;
    assert_eq!(result.error_code().map(|c| c.as_str()), Some("not_implemented"));
}

#[tokio::test]
async fn dispatch_without_session_fails_cleanly() {
    let h = harness();
    let result = h
        .dispatcher
        .dispatch("CA-nope", "capture_identity", json!({"first_name": "A", "last_name": "B"}))
        .await;
    assert_eq!(result.error_code().map(|c| c.as_str()), Some("session_not_found"));
}

#[tokio::test]
async fn incomplete_payload_is_invalid_and_names_the_fields() {
    let h = harness();
    h.start_call().await;
    let result = h
        .dispatcher
        .dispatch(SID, "capture_identity", json!({"first_name": "Ada"}))
        .await;
    assert_eq!(
        result.error_code().map(|c| c.as_str()),
        Some("invalid_payload")
    );
    let details = result.error.unwrap().details.unwrap();
    assert_eq!(details["missing"], json!(["last_name"]));
}

#[tokio::test]
async fn capture_identity_once_then_repeat_is_illegal_state() {
    let h = harness();
    h.start_call().await;
    let payload = json!({"first_name": "Ada", "last_name": "Lovelace"});

    let first = h.dispatcher.dispatch(SID, "capture_identity", payload.clone()).await;
    assert!(first.ok);
    assert_eq!(first.stage, Some(CallStage::IdentityChecked));
    assert_eq!(first.data.as_ref().unwrap()["contact_id"], "contact-1");

    let second = h.dispatcher.dispatch(SID, "capture_identity", payload).await;
    assert!(!second.ok);
    assert_eq!(second.error_code().map(|c| c.as_str()), Some("illegal_state"));
    assert_eq!(h.crm.upserts.load(Ordering::SeqCst), 1);
    assert_eq!(h.crm.deals.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn crm_outage_during_identity_capture_is_retryable() {
    let h = harness_with_crm(MockCrm::failing_upsert_once());
    h.start_call().await;
    let payload = json!({"first_name": "Ada", "last_name": "Lovelace"});

    let first = h.dispatcher.dispatch(SID, "capture_identity", payload.clone()).await;
    assert!(!first.ok);
    assert_eq!(first.error_code().map(|c| c.as_str()), Some("crm_sync_failed"));
    // The failed effect must not advance the workflow.
    assert_eq!(first.stage, Some(CallStage::CallStarted));

    let retry = h.dispatcher.dispatch(SID, "capture_identity", payload.clone()).await;
    assert!(retry.ok, "retry should succeed: {:?}", retry.error);
    assert_eq!(retry.stage, Some(CallStage::IdentityChecked));
    assert_eq!(h.crm.upserts.load(Ordering::SeqCst), 1);

    // The call proceeds normally from here.
    let address = h
        .dispatcher
        .dispatch(
            SID,
            "confirm_address",
            json!({"line1": "1 Main St", "city": "Springfield", "state": "IL",
                   "postal_code": "62701"}),
        )
        .await;
    assert!(address.ok, "{:?}", address.error);

    // Repeating after success is a workflow error, not a retry.
    let repeat = h.dispatcher.dispatch(SID, "capture_identity", payload).await;
    assert_eq!(repeat.error_code().map(|c| c.as_str()), Some("illegal_state"));
    assert_eq!(h.crm.upserts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn booking_twice_creates_one_calendar_event() {
    let h = harness();
    h.drive_to_scheduling().await;
    let slot = MockCalendar::fixed_slots()[0].start.to_rfc3339();

    let first = h
        .dispatcher
        .dispatch(SID, "book_estimate", json!({"slot_start": slot}))
        .await;
    let second = h
        .dispatcher
        .dispatch(SID, "book_estimate", json!({"slot_start": slot}))
        .await;

    assert!(first.ok && second.ok);
    assert_eq!(first.stage, Some(CallStage::Booked));
    assert_eq!(second.stage, Some(CallStage::Booked));
    assert_eq!(first.data, second.data, "replay must return the identical booking");
    assert_eq!(h.calendar.bookings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn booking_an_unproposed_slot_is_invalid_payload() {
    let h = harness();
    h.drive_to_scheduling().await;

    let result = h
        .dispatcher
        .dispatch(SID, "book_estimate", json!({"slot_start": "2030-01-01T09:00:00Z"}))
        .await;
    assert_eq!(result.error_code().map(|c| c.as_str()), Some("invalid_payload"));
    assert_eq!(result.error.unwrap().details.unwrap()["field"], "slot_start");
    assert_eq!(h.calendar.bookings.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn calendar_outage_leaves_stage_advanced_and_retry_books_once() {
    let h = harness_with_calendar(MockCalendar::failing_once());
    h.drive_to_scheduling().await;
    let slot = MockCalendar::fixed_slots()[0].start.to_rfc3339();

    let first = h
        .dispatcher
        .dispatch(SID, "book_estimate", json!({"slot_start": slot}))
        .await;
    assert!(!first.ok);
    assert_eq!(
        first.error_code().map(|c| c.as_str()),
        Some("calendar_booking_failed")
    );
    // Transition happened before the effect; retry re-enters from Booked.
    assert_eq!(first.stage, Some(CallStage::Booked));

    let second = h
        .dispatcher
        .dispatch(SID, "book_estimate", json!({"slot_start": slot}))
        .await;
    assert!(second.ok, "retry should succeed: {:?}", second.error);
    assert_eq!(h.calendar.bookings.load(Ordering::SeqCst), 1);
    assert!(h.alerts.notifies.load(Ordering::SeqCst) >= 1, "failure should alert");
}

#[tokio::test]
async fn confirmation_sms_requires_consent_and_sends_exactly_once() {
    let h = harness();
    h.drive_to_booked().await;

    // Before consent: refused, nothing sent.
    let refused = h
        .dispatcher
        .dispatch(SID, "send_confirmation_sms", json!({}))
        .await;
    assert_eq!(
        refused.error_code().map(|c| c.as_str()),
        Some("sms_consent_required")
    );
    assert_eq!(h.sms.sends.load(Ordering::SeqCst), 0);

    let consent = h
        .dispatcher
        .dispatch(SID, "request_sms_consent", json!({"consent": true}))
        .await;
    assert!(consent.ok, "{:?}", consent.error);
    assert_eq!(h.crm.consent_updates.load(Ordering::SeqCst), 1);

    let sent = h
        .dispatcher
        .dispatch(SID, "send_confirmation_sms", json!({}))
        .await;
    assert!(sent.ok, "{:?}", sent.error);
    assert_eq!(sent.stage, Some(CallStage::ConfirmationSent));

    // Retry replays the stored receipt; no second send.
    let retried = h
        .dispatcher
        .dispatch(SID, "send_confirmation_sms", json!({}))
        .await;
    assert!(retried.ok);
    assert_eq!(retried.data, sent.data);
    assert_eq!(h.sms.sends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn declined_consent_still_blocks_sms() {
    let h = harness();
    h.drive_to_booked().await;

    let declined = h
        .dispatcher
        .dispatch(SID, "request_sms_consent", json!({"consent": false}))
        .await;
    assert!(declined.ok);

    let refused = h
        .dispatcher
        .dispatch(SID, "send_confirmation_sms", json!({}))
        .await;
    assert_eq!(
        refused.error_code().map(|c| c.as_str()),
        Some("sms_consent_required")
    );
    assert_eq!(h.sms.sends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn escalate_alerts_and_log_call_closes_out() {
    let h = harness();
    h.drive_to_scheduling().await;

    let escalated = h
        .dispatcher
        .dispatch(SID, "escalate", json!({"reason": "caller asked for a human"}))
        .await;
    assert!(escalated.ok, "{:?}", escalated.error);
    assert_eq!(escalated.stage, Some(CallStage::Escalated));
    assert_eq!(h.alerts.notifies.load(Ordering::SeqCst), 1);
    assert!(h.crm.notes.load(Ordering::SeqCst) >= 1);

    let logged = h
        .dispatcher
        .dispatch(SID, "log_call", json!({"summary": "escalated to dispatcher"}))
        .await;
    assert!(logged.ok, "{:?}", logged.error);
    assert_eq!(logged.stage, Some(CallStage::Logged));

    // Once written up, escalation is no longer a legal move.
    let too_late = h
        .dispatcher
        .dispatch(SID, "escalate", json!({"reason": "again"}))
        .await;
    assert_eq!(too_late.error_code().map(|c| c.as_str()), Some("illegal_state"));
}

#[tokio::test]
async fn book_estimate_requires_collected_session_fields() {
    let h = harness();
    h.start_call().await;
    // Force the session into Scheduling without the CRM steps.
    {
        let handle = h.sessions.get(SID).await.unwrap();
        let mut session = handle.lock().await;
        for stage in [
            CallStage::IdentityChecked,
            CallStage::AddressConfirmed,
            CallStage::ProblemCaptured,
            CallStage::Scheduling,
        ] {
            frontdesk_session::transition(&mut session, stage, "test-setup").unwrap();
        }
    }

    let result = h
        .dispatcher
        .dispatch(SID, "book_estimate", json!({"slot_start": "2026-03-02T09:00:00Z"}))
        .await;
    assert_eq!(
        result.error_code().map(|c| c.as_str()),
        Some("missing_required_fields")
    );
    let missing = result.error.unwrap().details.unwrap()["missing"].clone();
    assert!(missing.as_array().unwrap().contains(&json!("contact.crm_contact_id")));
}
