//! The tool registry.
//!
//! One static table describes every tool the conversation can invoke: which
//! stages it may run from, which stage it drives the call into, whether a
//! retry from the target stage replays, and what payload fields it takes.
//! The dispatch pipeline reads the table for all of its generic gates; only
//! the side-effect bodies live in code.

use crate::schema::{FieldKind, FieldSpec};
use frontdesk_types::CallStage;

/// Static description of one tool.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    /// One-line purpose, surfaced to the AI peer as the function description.
    pub description: &'static str,
    /// Known tools that are not wired up yet dispatch to `not_implemented`.
    pub implemented: bool,
    /// Stages the tool may be invoked from. For replayable tools this
    /// includes the target stage itself, which is what lets a retry re-enter
    /// after the transition already happened.
    pub allowed_stages: &'static [CallStage],
    /// Stage the call moves to on success; `None` for tools that only
    /// record data.
    pub target: Option<CallStage>,
    /// Whether invoking the tool again from its target stage replays the
    /// stored side-effect result instead of being an error.
    pub replay_from_target: bool,
    pub fields: &'static [FieldSpec],
}

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "capture_identity",
        description: "Record the caller's name and contact details and sync them to the CRM.",
        implemented: true,
        allowed_stages: &[CallStage::CallStarted],
        target: Some(CallStage::IdentityChecked),
        replay_from_target: false,
        fields: &[
            FieldSpec::required("first_name", FieldKind::Text),
            FieldSpec::required("last_name", FieldKind::Text),
            FieldSpec::optional("phone", FieldKind::Text),
            FieldSpec::optional("email", FieldKind::Text),
        ],
    },
    ToolSpec {
        name: "confirm_address",
        description: "Confirm the service address where the visit will take place.",
        implemented: true,
        allowed_stages: &[CallStage::IdentityChecked],
        target: Some(CallStage::AddressConfirmed),
        replay_from_target: false,
        fields: &[
            FieldSpec::required("line1", FieldKind::Text),
            FieldSpec::required("city", FieldKind::Text),
            FieldSpec::required("state", FieldKind::Text),
            FieldSpec::required("postal_code", FieldKind::Text),
        ],
    },
    ToolSpec {
        name: "capture_problem",
        description: "Record the caller's description of the problem and its urgency.",
        implemented: true,
        allowed_stages: &[CallStage::AddressConfirmed],
        target: Some(CallStage::ProblemCaptured),
        replay_from_target: false,
        fields: &[
            FieldSpec::required("description", FieldKind::Text),
            FieldSpec::optional("urgency", FieldKind::Integer { min: 1, max: 5 }),
        ],
    },
    ToolSpec {
        name: "propose_slots",
        description: "Offer the caller available appointment windows.",
        implemented: true,
        allowed_stages: &[CallStage::ProblemCaptured, CallStage::Scheduling],
        target: Some(CallStage::Scheduling),
        replay_from_target: true,
        fields: &[FieldSpec::optional(
            "count",
            FieldKind::Integer { min: 1, max: 10 },
        )],
    },
    ToolSpec {
        name: "book_estimate",
        description: "Book the estimate visit in one of the proposed windows.",
        implemented: true,
        allowed_stages: &[CallStage::Scheduling, CallStage::Booked],
        target: Some(CallStage::Booked),
        replay_from_target: true,
        fields: &[FieldSpec::required("slot_start", FieldKind::Timestamp)],
    },
    ToolSpec {
        name: "request_sms_consent",
        description: "Ask for and record the caller's consent to receive a confirmation text.",
        implemented: true,
        allowed_stages: &[CallStage::Booked, CallStage::ConfirmationSent],
        target: None,
        replay_from_target: false,
        fields: &[FieldSpec::required("consent", FieldKind::Bool)],
    },
    ToolSpec {
        name: "send_confirmation_sms",
        description: "Text the caller a confirmation of the booked visit.",
        implemented: true,
        allowed_stages: &[CallStage::Booked, CallStage::ConfirmationSent],
        target: Some(CallStage::ConfirmationSent),
        replay_from_target: true,
        fields: &[],
    },
    ToolSpec {
        name: "log_call",
        description: "Write up the call outcome in the CRM.",
        implemented: true,
        allowed_stages: &[
            CallStage::ProblemCaptured,
            CallStage::Scheduling,
            CallStage::Booked,
            CallStage::ConfirmationSent,
            CallStage::Escalated,
        ],
        target: Some(CallStage::Logged),
        replay_from_target: false,
        fields: &[FieldSpec::required("summary", FieldKind::Text)],
    },
    ToolSpec {
        name: "escalate",
        description: "Hand the call off to a human dispatcher.",
        implemented: true,
        allowed_stages: &[
            CallStage::CallStarted,
            CallStage::IdentityChecked,
            CallStage::AddressConfirmed,
            CallStage::ProblemCaptured,
            CallStage::Scheduling,
            CallStage::Booked,
            CallStage::ConfirmationSent,
        ],
        target: Some(CallStage::Escalated),
        replay_from_target: false,
        fields: &[FieldSpec::required("reason", FieldKind::Text)],
    },
    ToolSpec {
        name: "handle_payment",
        description: "Take a payment over the phone (not yet available).",
        implemented: false,
        allowed_stages: &[],
        target: None,
        replay_from_target: false,
        fields: &[],
    },
];

/// Looks up a tool by name.
pub fn spec_for(tool: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|spec| spec.name == tool)
}

/// Session fields that must already be collected before a transition, as
/// dotted paths into the session. Keyed by the transition rather than the
/// tool so the requirement holds no matter which tool drives the move.
pub fn transition_prerequisites(from: CallStage, to: CallStage) -> &'static [&'static str] {
    match (from, to) {
        (_, CallStage::AddressConfirmed) => &["contact.crm_contact_id"],
        (_, CallStage::ProblemCaptured) => &["address"],
        (CallStage::ProblemCaptured, CallStage::Scheduling) => &["problem"],
        (_, CallStage::Booked) => &[
            "contact.crm_contact_id",
            "contact.crm_deal_id",
            "proposed_slots",
        ],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frontdesk_session::can_transition;

    #[test]
    fn tool_names_are_unique() {
        for (i, a) in TOOLS.iter().enumerate() {
            for b in &TOOLS[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn every_target_is_reachable_from_every_allowed_stage() {
        for spec in TOOLS {
            let Some(target) = spec.target else { continue };
            for &from in spec.allowed_stages {
                if from == target {
                    assert!(
                        spec.replay_from_target,
                        "{}: target in allowed stages only makes sense for replayable tools",
                        spec.name
                    );
                    continue;
                }
                assert!(
                    can_transition(Some(from), target),
                    "{}: {from} -> {target} must be a legal transition",
                    spec.name
                );
            }
        }
    }

    #[test]
    fn replayable_tools_allow_reentry_from_target() {
        for spec in TOOLS.iter().filter(|s| s.replay_from_target) {
            let target = spec.target.expect("replayable tools have a target");
            assert!(
                spec.allowed_stages.contains(&target),
                "{}: replay requires the target stage in allowed stages",
                spec.name
            );
        }
    }

    #[test]
    fn unknown_tool_lookup_misses() {
        assert!(spec_for("book_estimate").is_some());
        assert!(spec_for("transfer_funds").is_none());
    }
}
