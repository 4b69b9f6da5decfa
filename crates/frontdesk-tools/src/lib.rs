//! Tool registry and dispatch pipeline for frontdesk.
//!
//! The conversation drives the call workflow by invoking named tools; this
//! crate owns the registry describing each tool (stage gates, target stage,
//! replay behavior, payload schema) and the [`Dispatcher`] that validates,
//! transitions, and runs side effects with at-most-once semantics.

pub mod dispatch;
pub mod registry;
pub mod schema;

pub use dispatch::Dispatcher;
pub use registry::{spec_for, ToolSpec, TOOLS};
pub use schema::{validate_payload, FieldKind, FieldSpec};
