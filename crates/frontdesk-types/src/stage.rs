//! Call workflow stages and the audit trail of stage transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named point in the call workflow.
///
/// Stages form a fixed sequence (see [`STAGE_ORDER`]); the legal moves
/// between them are decided by the state machine in `frontdesk-session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStage {
    CallStarted,
    IdentityChecked,
    AddressConfirmed,
    ProblemCaptured,
    Scheduling,
    Booked,
    ConfirmationSent,
    Logged,
    Escalated,
    CallEnded,
}

/// The fixed workflow ordering. "One step forward" transitions follow this
/// sequence; fan-in exceptions (`Logged`, `Escalated`, `CallEnded`) are
/// defined by the state machine.
pub const STAGE_ORDER: [CallStage; 10] = [
    CallStage::CallStarted,
    CallStage::IdentityChecked,
    CallStage::AddressConfirmed,
    CallStage::ProblemCaptured,
    CallStage::Scheduling,
    CallStage::Booked,
    CallStage::ConfirmationSent,
    CallStage::Logged,
    CallStage::Escalated,
    CallStage::CallEnded,
];

impl CallStage {
    /// Returns the position of this stage in [`STAGE_ORDER`].
    ///
    /// Declaration order matches [`STAGE_ORDER`], so the discriminant is the
    /// ordinal.
    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Returns the string label for this stage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CallStarted => "CALL_STARTED",
            Self::IdentityChecked => "IDENTITY_CHECKED",
            Self::AddressConfirmed => "ADDRESS_CONFIRMED",
            Self::ProblemCaptured => "PROBLEM_CAPTURED",
            Self::Scheduling => "SCHEDULING",
            Self::Booked => "BOOKED",
            Self::ConfirmationSent => "CONFIRMATION_SENT",
            Self::Logged => "LOGGED",
            Self::Escalated => "ESCALATED",
            Self::CallEnded => "CALL_ENDED",
        }
    }

    /// True for the terminal stage.
    pub fn is_terminal(self) -> bool {
        self == Self::CallEnded
    }
}

impl std::fmt::Display for CallStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a session's append-only transition audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// When the transition was applied.
    pub at: DateTime<Utc>,
    /// The stage before the transition; `None` for the initial transition.
    pub from: Option<CallStage>,
    /// The stage after the transition.
    pub to: CallStage,
    /// Free-form reason supplied by the caller (tool name, relay event).
    pub reason: String,
}
