//! Unified error type for the labdesk workspace.

use thiserror::Error;

/// Enumerates all error kinds that can occur across labdesk crates.
#[derive(Debug, Error)]
pub enum LabError {
    /// A 401 that is not eligible for a token refresh: the request targets
    /// the login/registration endpoints or has already been retried once.
    #[error("authentication expired: {path}")]
    AuthExpired { path: String },

    /// The refresh endpoint rejected the stored refresh token or could not be reached.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// A refresh was requested while no refresh token is stored.
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The chat event stream could not be opened or broke while reading.
    #[error("stream transport error: {0}")]
    StreamTransport(String),

    /// One record of the chat event stream carried malformed JSON.
    #[error("stream record parse error: {0}")]
    StreamRecordParse(String),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(String),

    /// The backend returned a non-success status.
    #[error("upstream error: status={status}, body={body}")]
    Upstream { status: u16, body: String },

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistent token storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),
}

// ── Feature-gated From impls ──────────────────────────────────────────────────

#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for LabError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for LabError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl LabError {
    /// Returns `true` if this error ends the session: the caller has to log
    /// in again before authenticated requests can succeed.
    #[must_use]
    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            Self::AuthExpired { .. } | Self::RefreshFailed(_) | Self::NoRefreshToken
        )
    }

    /// Returns the HTTP status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::AuthExpired { .. } => Some(401),
            _ => None,
        }
    }
}
