use thiserror::Error;

/// Errors surfaced by the mailbox API boundary.
///
/// Rate-limit and auth-expiry are distinct variants because callers react to
/// them differently: 429 is retried with backoff, auth-expiry is surfaced so
/// the host can force re-authentication.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication expired")]
    AuthExpired,

    #[error("rate limited by mailbox API")]
    RateLimited,

    #[error("mailbox API returned status {0}")]
    Status(u16),

    #[error("token provider error: {0}")]
    Token(String),

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode API response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// True when the caller should prompt for re-authentication instead of
    /// treating this as a retryable or generic failure.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired)
    }
}

/// Errors from the retrieval pipeline as a whole.
///
/// A listing failure is fatal to the retrieval; individual detail-fetch
/// failures are dropped per message and never appear here.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("authentication expired")]
    AuthExpired,

    #[error("failed to list unread messages: {0}")]
    Listing(#[source] ApiError),
}

impl From<ApiError> for FetchError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::AuthExpired => FetchError::AuthExpired,
            other => FetchError::Listing(other),
        }
    }
}
