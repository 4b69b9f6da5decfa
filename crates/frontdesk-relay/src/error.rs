use thiserror::Error;

/// Errors from the media relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The AI peer cannot be dialed without credentials; the caller
    /// connection is failed immediately.
    #[error("AI credentials are not configured")]
    MissingCredentials,

    /// AI-side WebSocket failure (connect, send, protocol).
    #[error("AI socket error: {0}")]
    Ai(#[from] tokio_tungstenite::tungstenite::Error),
}
