use async_trait::async_trait;
use thiserror::Error;

/// Error returned by a token provider.
///
/// `Expired` is kept separate from generic failure so every call site can
/// surface "please re-authenticate" instead of a retryable error.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("authentication expired")]
    Expired,

    #[error("token provider failure: {0}")]
    Provider(String),
}

/// Boundary to the host's OAuth machinery.
///
/// The engine never acquires or refreshes tokens itself; it only asks for a
/// bearer credential and reacts to expiry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a bearer token usable for the next request.
    async fn access_token(&self) -> Result<String, TokenError>;
}

/// Token provider backed by a fixed string, for tests and short-lived tools
/// that already hold a valid token.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, TokenError> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_returns_token() {
        let provider = StaticTokenProvider::new("ya29.token");
        assert_eq!(provider.access_token().await.unwrap(), "ya29.token");
    }

    #[tokio::test]
    async fn test_mock_provider_signals_expiry() {
        let mut mock = MockTokenProvider::new();
        mock.expect_access_token()
            .returning(|| Err(TokenError::Expired));

        let err = mock.access_token().await.unwrap_err();
        assert!(matches!(err, TokenError::Expired));
    }
}
