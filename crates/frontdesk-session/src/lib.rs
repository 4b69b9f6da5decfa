//! Call session lifecycle for frontdesk.
//!
//! A [`CallSession`] is created when the telephony stream signals start,
//! mutated by the tool dispatch pipeline and by relay liveness touches, and
//! destroyed when the call ends, is finalized, or idles past its TTL.
//!
//! The [`machine`] module holds the pure transition rules; the
//! [`SessionStore`] owns every live session and serializes per-session
//! mutation behind one `tokio::sync::Mutex` per session.

pub mod machine;
mod session;
mod store;

pub use machine::{can_transition, transition, TransitionError};
pub use session::CallSession;
pub use store::{SessionHandle, SessionStore};
