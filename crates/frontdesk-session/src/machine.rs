//! Pure transition rules for the call workflow.
//!
//! Most transitions move exactly one step forward in the fixed stage order.
//! Three exceptions:
//!
//! - `CallEnded` is terminal and reachable from any non-terminal stage;
//! - `Logged` fans in from every stage where finalize-and-log is a sensible
//!   outcome (problem captured onward, plus escalation);
//! - `Escalated` fans in from every pre-log workflow stage, since a call can
//!   go sideways at any point before it is written up.
//!
//! `Logged → Escalated` is deliberately not legal even though it is one
//! ordinal step: once a call is written up, the only move left is ending it.

use crate::session::CallSession;
use chrono::Utc;
use frontdesk_types::{CallStage, TransitionRecord};
use thiserror::Error;

/// Stages from which `Logged` is directly reachable.
const LOGGED_SOURCES: [CallStage; 5] = [
    CallStage::ProblemCaptured,
    CallStage::Scheduling,
    CallStage::Booked,
    CallStage::ConfirmationSent,
    CallStage::Escalated,
];

/// Stages from which `Escalated` is directly reachable.
const ESCALATION_SOURCES: [CallStage; 7] = [
    CallStage::CallStarted,
    CallStage::IdentityChecked,
    CallStage::AddressConfirmed,
    CallStage::ProblemCaptured,
    CallStage::Scheduling,
    CallStage::Booked,
    CallStage::ConfirmationSent,
];

/// Errors from transition application.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// The requested move is not legal from the current stage.
    #[error("illegal transition: {from:?} -> {to}")]
    Illegal {
        from: Option<CallStage>,
        to: CallStage,
    },
}

/// Decides whether a transition is legal.
///
/// `from == None` means "no prior state": only the initial `CallStarted`
/// transition is legal from there.
pub fn can_transition(from: Option<CallStage>, to: CallStage) -> bool {
    let Some(from) = from else {
        return to == CallStage::CallStarted;
    };

    if from == to {
        return false; // no self-loops
    }
    if from.is_terminal() {
        return false; // CallEnded accepts nothing further
    }
    if to == CallStage::CallEnded {
        return true; // a call can end at any point
    }
    if to == CallStage::Logged {
        return LOGGED_SOURCES.contains(&from);
    }
    if to == CallStage::Escalated {
        return ESCALATION_SOURCES.contains(&from);
    }

    to.ordinal() == from.ordinal() + 1
}

/// Validates and applies a transition.
///
/// On success the stage, `updated_at`, and `last_seen` are updated and an
/// audit entry is appended — all together, never partially. On failure the
/// session is untouched.
///
/// # Errors
///
/// Returns [`TransitionError::Illegal`] carrying from/to when the move is
/// not legal.
pub fn transition(
    session: &mut CallSession,
    to: CallStage,
    reason: &str,
) -> Result<(), TransitionError> {
    let from = session.stage;
    if !can_transition(Some(from), to) {
        return Err(TransitionError::Illegal {
            from: Some(from),
            to,
        });
    }

    let now = Utc::now();
    session.stage = to;
    session.updated_at = now;
    session.touch();
    session.audit.push(TransitionRecord {
        at: now,
        from: Some(from),
        to,
        reason: reason.to_string(),
    });

    tracing::debug!(
        call_sid = %session.call_sid,
        from = %from,
        to = %to,
        reason,
        "stage transition applied"
    );

    Ok(())
}
