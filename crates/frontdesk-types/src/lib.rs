//! Shared types and constants for the frontdesk platform.
//!
//! This crate provides the foundational types used across all frontdesk
//! crates: the call workflow stage enum, the structured fields collected
//! during a call, and the uniform tool dispatch result shape.
//!
//! No crate in the workspace depends on anything *except* `frontdesk-types`
//! for cross-cutting type definitions. This keeps the dependency graph clean
//! and prevents circular dependencies.

mod fields;
mod result;
mod stage;

pub use fields::{Booking, ContactInfo, ProblemReport, ServiceAddress, SlotProposal, SmsConsent};
pub use result::{ErrorCode, ToolFailure, ToolResult};
pub use stage::{CallStage, TransitionRecord, STAGE_ORDER};

/// The single tenant identifier for this deployment.
///
/// The system is single-tenant; the tenant id is still part of every
/// idempotency key so the persisted table stays unambiguous if records from
/// multiple deployments are ever merged for analysis.
pub const TENANT_ID: &str = "frontdesk";
