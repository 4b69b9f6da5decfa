//! Per-call relay flags.
//!
//! All once-only decisions for one call live here, behind a single mutex in
//! the relay: greet exactly once, cancel an interrupted response exactly
//! once, finalize exactly once. The methods return whether the caller should
//! act, so the decision and the flag flip are one atomic step.

/// Mutable relay state for one call.
#[derive(Debug, Default)]
pub struct CallFlags {
    /// The caller's stream start frame has been observed.
    started: bool,
    /// The AI session has been configured (`session.update` sent).
    config_sent: bool,
    greeting_sent: bool,
    /// The AI is currently producing audible output.
    ai_speaking: bool,
    finalized: bool,
}

impl CallFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the stream start; returns true if the greeting is now due.
    pub fn note_stream_started(&mut self) -> bool {
        self.started = true;
        self.greeting_due()
    }

    /// Records that the AI session is configured; returns true if the
    /// greeting is now due.
    pub fn note_config_sent(&mut self) -> bool {
        self.config_sent = true;
        self.greeting_due()
    }

    /// The greeting fires exactly once, as soon as both the stream start and
    /// the session configuration have happened, in either order.
    fn greeting_due(&mut self) -> bool {
        if self.started && self.config_sent && !self.greeting_sent {
            self.greeting_sent = true;
            true
        } else {
            false
        }
    }

    /// Caller audio arrived. Returns true when this frame interrupts the AI
    /// mid-response: the caller gets exactly one cancel/clear pair and the
    /// speaking flag drops, so immediate follow-up frames pass through
    /// without further cancellation.
    pub fn barge_in(&mut self) -> bool {
        std::mem::replace(&mut self.ai_speaking, false)
    }

    /// AI response audio is flowing.
    pub fn note_ai_audio(&mut self) {
        self.ai_speaking = true;
    }

    /// The AI finished (or abandoned) its response.
    pub fn note_response_done(&mut self) {
        self.ai_speaking = false;
    }

    pub fn is_speaking(&self) -> bool {
        self.ai_speaking
    }

    /// Marks the call finalized; true only for the first caller.
    pub fn finalize(&mut self) -> bool {
        !std::mem::replace(&mut self.finalized, true)
    }
}
