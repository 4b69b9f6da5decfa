//! The tool dispatch pipeline.
//!
//! Every workflow step — whether it arrives as a function call from the AI
//! conversation or through the HTTP API — funnels through
//! [`Dispatcher::dispatch`]:
//!
//! 1. look up and lock the call session, refreshing its liveness;
//! 2. resolve the tool in the registry;
//! 3. validate the payload against the tool's field schema;
//! 4. gate on the current stage and on collected prerequisites;
//! 5. run the side effects through the idempotency executor and apply the
//!    stage transition;
//! 6. record collected fields on the session and return the uniform result.
//!
//! The transition/effect ordering in step 5 depends on the tool, and either
//! ordering keeps a side-effect failure retryable. Replayable tools commit
//! the transition first: a retry re-enters from the target stage through
//! the replay gate and the stored effect result is replayed. One-shot tools
//! transition only after their effect succeeds, so a failed effect leaves
//! the stage untouched and the identical invocation retries cleanly.

use crate::registry::{spec_for, transition_prerequisites, ToolSpec};
use crate::schema::validate_payload;
use chrono::Utc;
use frontdesk_connect::{AlertApi, CalendarApi, ConnectError, CrmApi, SmsApi};
use frontdesk_idempotency::{EffectError, EffectExecutor, IdempotencyKey};
use frontdesk_session::{transition, CallSession, SessionStore};
use frontdesk_types::{
    Booking, CallStage, ContactInfo, ErrorCode, ProblemReport, ServiceAddress, SmsConsent,
    ToolFailure, ToolResult, TENANT_ID,
};
use futures_util::FutureExt;
use serde_json::{json, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Dispatches tool invocations against call sessions.
///
/// Collaborators are trait objects so tests drive the pipeline with
/// in-memory doubles.
#[derive(Clone)]
pub struct Dispatcher {
    sessions: SessionStore,
    executor: EffectExecutor,
    crm: Arc<dyn CrmApi>,
    calendar: Arc<dyn CalendarApi>,
    sms: Arc<dyn SmsApi>,
    alerts: Arc<dyn AlertApi>,
}

impl Dispatcher {
    pub fn new(
        sessions: SessionStore,
        executor: EffectExecutor,
        crm: Arc<dyn CrmApi>,
        calendar: Arc<dyn CalendarApi>,
        sms: Arc<dyn SmsApi>,
        alerts: Arc<dyn AlertApi>,
    ) -> Self {
        Self {
            sessions,
            executor,
            crm,
            calendar,
            sms,
            alerts,
        }
    }

    /// Dispatches one tool invocation. Never fails at the type level: every
    /// internal error, including a panic in a tool body, is converted into a
    /// failure [`ToolResult`].
    pub async fn dispatch(&self, call_sid: &str, tool: &str, payload: Value) -> ToolResult {
        match AssertUnwindSafe(self.dispatch_inner(call_sid, tool, &payload))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(call_sid, tool, "panic during tool dispatch");
                ToolResult::failure(
                    tool,
                    ToolFailure::new(ErrorCode::Internal, "internal error during dispatch"),
                )
            }
        }
    }

    async fn dispatch_inner(&self, call_sid: &str, tool: &str, payload: &Value) -> ToolResult {
        let Some(handle) = self.sessions.get(call_sid).await else {
            return ToolResult::failure(
                tool,
                ToolFailure::new(
                    ErrorCode::SessionNotFound,
                    format!("no active session for call {call_sid}"),
                ),
            );
        };
        let mut session = handle.lock().await;
        session.touch();

        let Some(spec) = spec_for(tool) else {
            return ToolResult::failure(
                tool,
                ToolFailure::new(ErrorCode::InvalidTool, format!("unknown tool `{tool}`")),
            );
        };
        if !spec.implemented {
            return ToolResult::failure(
                tool,
                ToolFailure::new(
                    ErrorCode::NotImplemented,
                    format!("`{tool}` is recognized but not available"),
                ),
            );
        }

        if let Err(failure) = validate_payload(spec.fields, payload) {
            return ToolResult::failure(tool, failure);
        }

        let from = session.stage;
        if !spec.allowed_stages.contains(&from) {
            return fail_at(
                tool,
                from,
                ToolFailure::new(
                    ErrorCode::IllegalState,
                    format!("`{tool}` cannot run while the call is in stage {from}"),
                )
                .with_details(json!({ "stage": from })),
            );
        }

        if let Err(failure) = self.check_prerequisites(spec, &session) {
            return fail_at(tool, from, failure);
        }

        // Replayable tools transition first so a retry after a partial
        // failure re-enters from the target stage through the replay gate.
        // One-shot tools transition after the effect: a failed effect must
        // leave the stage where it was.
        if spec.replay_from_target {
            if let Err(result) = apply_transition(spec, &mut session, tool, from) {
                return result;
            }
        }

        let outcome = match tool {
            "capture_identity" => self.capture_identity(call_sid, &mut session, payload).await,
            "confirm_address" => self.confirm_address(call_sid, &mut session, payload).await,
            "capture_problem" => self.capture_problem(call_sid, &mut session, payload).await,
            "propose_slots" => self.propose_slots(call_sid, &mut session, payload).await,
            "book_estimate" => self.book_estimate(call_sid, &mut session, payload).await,
            "request_sms_consent" => {
                self.request_sms_consent(call_sid, &mut session, payload).await
            }
            "send_confirmation_sms" => self.send_confirmation_sms(call_sid, &mut session).await,
            "log_call" => self.log_call(call_sid, &mut session, payload).await,
            "escalate" => self.escalate(call_sid, &mut session, payload).await,
            other => Err(ToolFailure::new(
                ErrorCode::Internal,
                format!("registered tool `{other}` has no dispatch body"),
            )),
        };

        match outcome {
            Ok(data) => {
                if !spec.replay_from_target {
                    if let Err(result) = apply_transition(spec, &mut session, tool, from) {
                        return result;
                    }
                }
                ToolResult::success(tool, session.stage, data)
            }
            Err(failure) => fail_at(tool, session.stage, failure),
        }
    }

    /// Prerequisite gates. Cross-field preconditions surface as
    /// `missing_prerequisites` (or an SMS-specific code); gaps in the
    /// per-transition required-field table surface as
    /// `missing_required_fields`.
    fn check_prerequisites(
        &self,
        spec: &ToolSpec,
        session: &CallSession,
    ) -> Result<(), ToolFailure> {
        if spec.name == "send_confirmation_sms" {
            if session.booking.is_none() {
                return Err(ToolFailure::new(
                    ErrorCode::SmsBookingRequired,
                    "no booking on file to confirm",
                ));
            }
            match &session.consent {
                Some(consent) if consent.granted => {}
                _ => {
                    return Err(ToolFailure::new(
                        ErrorCode::SmsConsentRequired,
                        "caller has not granted SMS consent",
                    ));
                }
            }
        }
        if spec.name == "request_sms_consent" && crm_contact_id(session).is_none() {
            return Err(ToolFailure::new(
                ErrorCode::MissingPrerequisites,
                "no CRM contact on file to record consent against",
            )
            .with_details(json!({ "missing": ["contact.crm_contact_id"] })));
        }

        let Some(target) = spec.target else {
            return Ok(());
        };
        let missing: Vec<&str> = transition_prerequisites(session.stage, target)
            .iter()
            .copied()
            .filter(|path| !has_session_field(session, path))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ToolFailure::new(
                ErrorCode::MissingRequiredFields,
                format!("session is missing: {}", missing.join(", ")),
            )
            .with_details(json!({ "missing": missing })))
        }
    }

    // -- tool bodies ------------------------------------------------------

    async fn capture_identity(
        &self,
        call_sid: &str,
        session: &mut CallSession,
        payload: &Value,
    ) -> Result<Value, ToolFailure> {
        let mut contact = ContactInfo {
            first_name: text(payload, "first_name"),
            last_name: text(payload, "last_name"),
            email: opt_text(payload, "email"),
            phone: opt_text(payload, "phone").or_else(|| session.caller.clone()),
            crm_contact_id: None,
            crm_deal_id: None,
        };

        let key = IdempotencyKey::derive(TENANT_ID, call_sid, "capture_identity", payload);
        let crm = self.crm.clone();
        let deal_title = format!("Estimate - {} {}", contact.first_name, contact.last_name);
        let upsert = contact.clone();
        let data = self
            .run_effect(call_sid, "capture_identity", &key, ErrorCode::CrmSyncFailed, || async move {
                let contact_id = crm.upsert_contact(&upsert).await?;
                let deal_id = crm.create_deal(&deal_title).await?;
                crm.associate_deal_contact(&deal_id, &contact_id).await?;
                Ok(json!({ "contact_id": contact_id, "deal_id": deal_id }))
            })
            .await?;

        contact.crm_contact_id = data
            .get("contact_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        contact.crm_deal_id = data
            .get("deal_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        session.contact = Some(contact);
        Ok(data)
    }

    async fn confirm_address(
        &self,
        call_sid: &str,
        session: &mut CallSession,
        payload: &Value,
    ) -> Result<Value, ToolFailure> {
        let address = ServiceAddress {
            line1: text(payload, "line1"),
            city: text(payload, "city"),
            state: text(payload, "state"),
            postal_code: text(payload, "postal_code"),
        };
        let note = format!(
            "Service address confirmed: {}, {}, {} {}",
            address.line1, address.city, address.state, address.postal_code
        );
        self.crm_note(call_sid, "confirm_address", session, payload, note)
            .await?;

        session.address = Some(address.clone());
        Ok(json!({ "address": address }))
    }

    async fn capture_problem(
        &self,
        call_sid: &str,
        session: &mut CallSession,
        payload: &Value,
    ) -> Result<Value, ToolFailure> {
        let problem = ProblemReport {
            description: text(payload, "description"),
            urgency: payload.get("urgency").and_then(Value::as_u64).map(|u| u as u8),
        };
        let note = match problem.urgency {
            Some(urgency) => format!("Problem (urgency {urgency}/5): {}", problem.description),
            None => format!("Problem: {}", problem.description),
        };
        self.crm_note(call_sid, "capture_problem", session, payload, note)
            .await?;

        session.problem = Some(problem.clone());
        Ok(json!({ "problem": problem }))
    }

    async fn propose_slots(
        &self,
        call_sid: &str,
        session: &mut CallSession,
        payload: &Value,
    ) -> Result<Value, ToolFailure> {
        let count = payload
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(3) as usize;

        // Read-only proposal: no idempotency key, every call may offer a
        // fresh set of windows.
        let slots = self
            .calendar
            .propose_slots(Utc::now(), count)
            .await
            .map_err(|e| {
                tracing::error!(call_sid, error = %e, "slot proposal failed");
                ToolFailure::new(ErrorCode::CalendarBookingFailed, e.to_string())
            })?;

        session.proposed_slots = slots.clone();
        Ok(json!({ "slots": slots }))
    }

    async fn book_estimate(
        &self,
        call_sid: &str,
        session: &mut CallSession,
        payload: &Value,
    ) -> Result<Value, ToolFailure> {
        let start = text(payload, "slot_start");
        let start = chrono::DateTime::parse_from_rfc3339(&start)
            .map_err(|_| {
                ToolFailure::new(ErrorCode::InvalidPayload, "field `slot_start` must be RFC 3339")
                    .with_details(json!({ "field": "slot_start" }))
            })?
            .with_timezone(&Utc);

        let Some(slot) = session
            .proposed_slots
            .iter()
            .find(|s| s.start == start)
            .cloned()
        else {
            return Err(ToolFailure::new(
                ErrorCode::InvalidPayload,
                "field `slot_start` does not match any proposed slot",
            )
            .with_details(json!({ "field": "slot_start" })));
        };

        let summary = booking_summary(session);
        let attendee = session.contact.as_ref().and_then(|c| c.email.clone());
        let calendar = self.calendar.clone();
        let book_slot = slot.clone();
        let key = IdempotencyKey::derive(TENANT_ID, call_sid, "book_estimate", payload);
        let data = self
            .run_effect(
                call_sid,
                "book_estimate",
                &key,
                ErrorCode::CalendarBookingFailed,
                || async move {
                    let booking = calendar
                        .book_slot(&book_slot, &summary, attendee.as_deref())
                        .await?;
                    Ok(serde_json::to_value(&booking).unwrap_or(Value::Null))
                },
            )
            .await?;

        let booking: Booking = serde_json::from_value(data.clone()).map_err(|e| {
            ToolFailure::new(
                ErrorCode::Internal,
                format!("stored booking result is malformed: {e}"),
            )
        })?;
        session.booking = Some(booking.clone());

        // Deal stage update is keyed separately so a failure here never
        // re-books the calendar event on retry.
        if let Some(deal_id) = session.contact.as_ref().and_then(|c| c.crm_deal_id.clone()) {
            let crm = self.crm.clone();
            let stage_key = IdempotencyKey::derive(
                TENANT_ID,
                call_sid,
                "book_estimate.deal_stage",
                payload,
            );
            let moved = deal_id.clone();
            self.run_effect(
                call_sid,
                "book_estimate",
                &stage_key,
                ErrorCode::CrmSyncFailed,
                || async move {
                    crm.update_deal_stage(&moved, "estimate_booked").await?;
                    Ok(json!({ "deal_id": moved, "stage": "estimate_booked" }))
                },
            )
            .await?;
        }

        Ok(json!({ "booking": booking }))
    }

    async fn request_sms_consent(
        &self,
        call_sid: &str,
        session: &mut CallSession,
        payload: &Value,
    ) -> Result<Value, ToolFailure> {
        let granted = payload
            .get("consent")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let contact_id = crm_contact_id(session).unwrap_or_default();
        let recorded_at = Utc::now();

        let crm = self.crm.clone();
        let key = IdempotencyKey::derive(TENANT_ID, call_sid, "request_sms_consent", payload);
        let updated = contact_id.clone();
        self.run_effect(
            call_sid,
            "request_sms_consent",
            &key,
            ErrorCode::CrmSyncFailed,
            || async move {
                crm.update_consent(&updated, granted, recorded_at).await?;
                Ok(json!({ "contact_id": updated, "consent": granted }))
            },
        )
        .await?;

        session.consent = Some(SmsConsent {
            granted,
            recorded_at,
        });
        Ok(json!({ "consent": granted }))
    }

    async fn send_confirmation_sms(
        &self,
        call_sid: &str,
        session: &mut CallSession,
    ) -> Result<Value, ToolFailure> {
        // Gates already guaranteed a booking and granted consent.
        let Some(booking) = session.booking.clone() else {
            return Err(ToolFailure::new(ErrorCode::SmsBookingRequired, "no booking on file"));
        };
        let Some(to) = session
            .contact
            .as_ref()
            .and_then(|c| c.phone.clone())
            .or_else(|| session.caller.clone())
        else {
            return Err(ToolFailure::new(
                ErrorCode::MissingPrerequisites,
                "no destination phone number on file",
            )
            .with_details(json!({ "missing": ["contact.phone"] })));
        };

        let body = format!(
            "Your estimate visit is booked for {}. Reply STOP to opt out.",
            booking.start.format("%A %B %-d at %-H:%M UTC")
        );
        let sms = self.sms.clone();
        let input = json!({ "to": to, "event_id": booking.event_id });
        let key = IdempotencyKey::derive(TENANT_ID, call_sid, "send_confirmation_sms", &input);
        let dest = to.clone();
        let data = self
            .run_effect(
                call_sid,
                "send_confirmation_sms",
                &key,
                ErrorCode::SmsSendFailed,
                || async move {
                    let receipt = sms.send_sms(&dest, &body).await?;
                    Ok(json!({ "message_id": receipt.message_id, "to": dest }))
                },
            )
            .await?;

        Ok(data)
    }

    async fn log_call(
        &self,
        call_sid: &str,
        session: &mut CallSession,
        payload: &Value,
    ) -> Result<Value, ToolFailure> {
        let summary = text(payload, "summary");
        let contact_id = crm_contact_id(session);
        let deal_id = session.contact.as_ref().and_then(|c| c.crm_deal_id.clone());

        if let Some(contact_id) = contact_id {
            let crm = self.crm.clone();
            let key = IdempotencyKey::derive(TENANT_ID, call_sid, "log_call", payload);
            let note = format!("Call summary: {summary}");
            self.run_effect(call_sid, "log_call", &key, ErrorCode::CrmSyncFailed, || async move {
                crm.log_note(&contact_id, deal_id.as_deref(), &note).await?;
                if let Some(deal_id) = deal_id.as_deref() {
                    crm.update_deal_stage(deal_id, "call_logged").await?;
                }
                Ok(json!({ "logged": true }))
            })
            .await?;
        } else {
            // A call escalated before identity capture has nowhere to log.
            tracing::warn!(call_sid, "log_call with no CRM contact; summary kept in audit only");
        }

        Ok(json!({ "summary": summary }))
    }

    async fn escalate(
        &self,
        call_sid: &str,
        session: &mut CallSession,
        payload: &Value,
    ) -> Result<Value, ToolFailure> {
        let reason = text(payload, "reason");

        self.alert_best_effort(
            "call_escalated",
            &json!({
                "call_sid": call_sid,
                "caller": session.caller,
                "reason": reason,
            }),
        )
        .await;

        if let Some(contact_id) = crm_contact_id(session) {
            let deal_id = session.contact.as_ref().and_then(|c| c.crm_deal_id.clone());
            let crm = self.crm.clone();
            let key = IdempotencyKey::derive(TENANT_ID, call_sid, "escalate", payload);
            let note = format!("Call escalated: {reason}");
            self.run_effect(call_sid, "escalate", &key, ErrorCode::CrmSyncFailed, || async move {
                crm.log_note(&contact_id, deal_id.as_deref(), &note).await?;
                Ok(json!({ "noted": true }))
            })
            .await?;
        }

        Ok(json!({ "reason": reason }))
    }

    // -- effect plumbing --------------------------------------------------

    /// Runs one side effect through the idempotency executor, mapping
    /// failures onto the caller-visible code. Storage failures mean the
    /// effect outcome is unknown and surface as `storage_error`.
    async fn run_effect<F, Fut>(
        &self,
        call_sid: &str,
        tool: &str,
        key: &IdempotencyKey,
        failure_code: ErrorCode,
        effect: F,
    ) -> Result<Value, ToolFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ConnectError>>,
    {
        match self.executor.execute(key, effect).await {
            Ok(outcome) => {
                if outcome.is_replay() {
                    tracing::info!(call_sid, tool, "side effect replayed from store");
                }
                Ok(outcome.into_inner())
            }
            Err(EffectError::Store(e)) => {
                tracing::error!(
                    call_sid,
                    tool,
                    error = %e,
                    "idempotency storage failure; side effect outcome unknown"
                );
                Err(ToolFailure::new(
                    ErrorCode::StorageError,
                    format!("side effect outcome unknown: {e}"),
                ))
            }
            Err(EffectError::Effect(e)) => {
                tracing::error!(call_sid, tool, error = %e, "side effect failed");
                self.alert_best_effort(
                    "tool_side_effect_failed",
                    &json!({ "call_sid": call_sid, "tool": tool, "error": e.to_string() }),
                )
                .await;
                Err(ToolFailure::new(failure_code, e.to_string()))
            }
        }
    }

    /// One idempotency-keyed CRM note against the session's contact.
    async fn crm_note(
        &self,
        call_sid: &str,
        operation: &str,
        session: &CallSession,
        payload: &Value,
        note: String,
    ) -> Result<(), ToolFailure> {
        let Some(contact_id) = crm_contact_id(session) else {
            return Err(ToolFailure::new(
                ErrorCode::MissingPrerequisites,
                "no CRM contact on file",
            )
            .with_details(json!({ "missing": ["contact.crm_contact_id"] })));
        };

        let deal_id = session.contact.as_ref().and_then(|c| c.crm_deal_id.clone());
        let crm = self.crm.clone();
        let key = IdempotencyKey::derive(TENANT_ID, call_sid, operation, payload);
        self.run_effect(call_sid, operation, &key, ErrorCode::CrmSyncFailed, || async move {
            crm.log_note(&contact_id, deal_id.as_deref(), &note).await?;
            Ok(json!({ "noted": true }))
        })
        .await?;
        Ok(())
    }

    async fn alert_best_effort(&self, event: &str, context: &Value) {
        if let Err(e) = self.alerts.notify(event, context).await {
            tracing::warn!(event, error = %e, "alert delivery failed");
        }
    }
}

/// Moves the session to the tool's target stage, if it has one and is not
/// already there.
fn apply_transition(
    spec: &ToolSpec,
    session: &mut CallSession,
    tool: &str,
    from: CallStage,
) -> Result<(), ToolResult> {
    let Some(target) = spec.target else {
        return Ok(());
    };
    if session.stage == target {
        return Ok(());
    }
    if let Err(err) = transition(session, target, tool) {
        return Err(fail_at(
            tool,
            from,
            ToolFailure::new(ErrorCode::IllegalTransition, err.to_string()),
        ));
    }
    Ok(())
}

fn fail_at(tool: &str, stage: CallStage, failure: ToolFailure) -> ToolResult {
    let mut result = ToolResult::failure(tool, failure);
    result.stage = Some(stage);
    result
}

fn crm_contact_id(session: &CallSession) -> Option<String> {
    session
        .contact
        .as_ref()
        .and_then(|c| c.crm_contact_id.clone())
}

/// True when the dotted session path is present and non-empty.
fn has_session_field(session: &CallSession, path: &str) -> bool {
    match path {
        "contact" => session.contact.is_some(),
        "contact.crm_contact_id" => crm_contact_id(session).is_some(),
        "contact.crm_deal_id" => session
            .contact
            .as_ref()
            .and_then(|c| c.crm_deal_id.as_ref())
            .is_some(),
        "address" => session.address.is_some(),
        "problem" => session.problem.is_some(),
        "proposed_slots" => !session.proposed_slots.is_empty(),
        "booking" => session.booking.is_some(),
        "consent" => session.consent.as_ref().map(|c| c.granted).unwrap_or(false),
        _ => false,
    }
}

fn booking_summary(session: &CallSession) -> String {
    let name = session
        .contact
        .as_ref()
        .map(|c| format!("{} {}", c.first_name, c.last_name))
        .unwrap_or_else(|| "caller".to_string());
    match &session.problem {
        Some(problem) => format!("Estimate: {name} ({})", problem.description),
        None => format!("Estimate: {name}"),
    }
}

fn text(payload: &Value, field: &str) -> String {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn opt_text(payload: &Value, field: &str) -> Option<String> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
