//! Media relay for frontdesk.
//!
//! Bridges a Twilio Media Streams WebSocket (the caller) to an OpenAI
//! Realtime WebSocket (the AI), forwarding base64 audio opaquely in both
//! directions, cancelling AI speech on caller barge-in, and dispatching
//! function calls from the conversation through the tool pipeline.

pub mod call;
mod error;
pub mod openai;
mod relay;
pub mod twilio;

pub use call::CallFlags;
pub use error::RelayError;
pub use openai::RealtimeSettings;
pub use relay::MediaRelay;
