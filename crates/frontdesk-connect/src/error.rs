use thiserror::Error;

/// Errors from the outbound collaborator clients.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Transport-level failure (connect, TLS, timeout, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote service answered with a non-success status.
    #[error("{service} returned {status}: {body}")]
    Remote {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The remote answered 2xx but the body was not the shape we expect.
    #[error("{service} response missing field `{field}`")]
    MalformedResponse {
        service: &'static str,
        field: &'static str,
    },

    /// Client-side misconfiguration (bad base URL, missing credentials).
    #[error("configuration error: {0}")]
    Config(String),
}

impl ConnectError {
    /// Builds a [`ConnectError::Remote`] from a non-success response,
    /// consuming the body for the message.
    pub(crate) async fn from_response(
        service: &'static str,
        response: reqwest::Response,
    ) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Self::Remote {
            service,
            status,
            body,
        }
    }
}
