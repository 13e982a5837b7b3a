use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::{TokenError, TokenProvider};
use crate::error::ApiError;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Search filter selecting the messages the triage deck operates on.
const UNREAD_QUERY: &str = "is:unread in:inbox";

/// Label whose presence marks a message unread; mark-as-read removes it.
pub const UNREAD_LABEL: &str = "UNREAD";
pub const STARRED_LABEL: &str = "STARRED";
pub const IMPORTANT_LABEL: &str = "IMPORTANT";

/// One page of a messages.list response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: Option<u64>,
}

/// Identifier pair returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
}

/// A raw provider message as returned by messages.get (format=full).
///
/// Owned transiently by the parser; never retained past parsing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: Option<String>,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: String,
    pub payload: Option<MessagePart>,
    /// Milliseconds since epoch, as a numeric string.
    pub internal_date: Option<String>,
}

/// One node of the nested MIME part tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Part content; `data` is base64url-encoded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    pub data: Option<String>,
    pub size: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest {
    add_label_ids: Vec<String>,
    remove_label_ids: Vec<String>,
}

/// Trait for mailbox operations - allows mocking in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailboxApi: Send + Sync {
    /// Lists one page of unread inbox message identifiers.
    async fn list_unread(
        &self,
        page_size: u32,
        page_token: Option<String>,
    ) -> Result<ListPage, ApiError>;

    /// Fetches the full message body for one identifier.
    async fn get_message(&self, id: &str) -> Result<RawMessage, ApiError>;

    /// Adds and removes labels on one message.
    async fn modify_labels(
        &self,
        id: &str,
        add: Vec<String>,
        remove: Vec<String>,
    ) -> Result<(), ApiError>;
}

/// Real Gmail REST client.
///
/// Maps transport status codes onto the error kinds the retrieval pipeline
/// reacts to: 429 becomes `RateLimited`, 401 becomes `AuthExpired`, any other
/// non-success becomes `Status`.
pub struct HttpMailboxClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpMailboxClient {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_base_url(tokens, GMAIL_API_BASE)
    }

    /// Overrides the API base URL, for tests against a local server.
    pub fn with_base_url(tokens: Arc<dyn TokenProvider>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            tokens,
        }
    }

    async fn bearer(&self) -> Result<String, ApiError> {
        self.tokens.access_token().await.map_err(|err| match err {
            TokenError::Expired => ApiError::AuthExpired,
            TokenError::Provider(msg) => ApiError::Token(msg),
        })
    }

    fn check_status(status: StatusCode) -> Result<(), ApiError> {
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Err(ApiError::RateLimited)
        } else if status == StatusCode::UNAUTHORIZED {
            Err(ApiError::AuthExpired)
        } else {
            Err(ApiError::Status(status.as_u16()))
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let token = self.bearer().await?;
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .bearer_auth(token)
            .send()
            .await?;
        Self::check_status(response.status())?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl MailboxApi for HttpMailboxClient {
    async fn list_unread(
        &self,
        page_size: u32,
        page_token: Option<String>,
    ) -> Result<ListPage, ApiError> {
        let mut query = vec![
            ("q", UNREAD_QUERY.to_string()),
            ("maxResults", page_size.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get_json("/users/me/messages", &query).await
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage, ApiError> {
        let path = format!("/users/me/messages/{id}");
        self.get_json(&path, &[("format", "full".to_string())])
            .await
    }

    async fn modify_labels(
        &self,
        id: &str,
        add: Vec<String>,
        remove: Vec<String>,
    ) -> Result<(), ApiError> {
        let token = self.bearer().await?;
        let response = self
            .client
            .post(format!("{}/users/me/messages/{id}/modify", self.base_url))
            .bearer_auth(token)
            .json(&ModifyRequest {
                add_label_ids: add,
                remove_label_ids: remove,
            })
            .send()
            .await?;
        Self::check_status(response.status())
    }
}
