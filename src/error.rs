use thiserror::Error;

/// Errors surfaced by the realtime core. `Clone` because the connection
/// manager both broadcasts an error and retains it as the last failure.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// Credential rejection. Never retried automatically; the caller has
    /// to supply a fresh token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Recoverable transport failure; the reconnection schedule applies.
    #[error("connection error: {0}")]
    Transient(String),

    /// The automatic reconnection ceiling was reached.
    #[error("unable to establish connection after multiple attempts")]
    Exhausted,

    /// An operation needed a live connection and there was none.
    #[error("not connected")]
    NotConnected,

    /// REST request failed or returned an unusable body.
    #[error("request failed: {0}")]
    Request(String),
}

impl ChatError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Transient(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ChatError::Auth(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Request(err.to_string())
    }
}
