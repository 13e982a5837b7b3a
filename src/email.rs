use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Placeholder used when a message carries no Subject header.
pub const NO_SUBJECT: &str = "(no subject)";

/// A normalized email message, produced by the parser from a raw provider
/// message and retained for the lifetime of the triage session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    pub thread_id: String,
    /// Display name of the sender ("Jane Doe" in `Jane Doe <jane@x.com>`).
    pub from_name: String,
    /// Sender address in its original case; compare via [`Email::sender_key`].
    pub from_email: String,
    pub subject: String,
    pub snippet: String,
    /// Extracted `text/plain` body; empty if none was found.
    pub body_text: String,
    /// Extracted `text/html` body; empty if none was found.
    pub body_html: String,
    pub date: DateTime<Utc>,
    pub unread: bool,
    pub starred: bool,
    pub important: bool,
    pub label_ids: Vec<String>,
}

impl Email {
    /// Canonical form of the sender address used for all grouping and merge
    /// lookups. Display names never participate in equality.
    pub fn sender_key(&self) -> String {
        self.from_email.to_lowercase()
    }
}

fn sender_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\s*"?([^"<]*)"?\s*<([^>]+)>"#).unwrap())
}

/// Splits a `From` header into (display name, address).
///
/// Recognizes the `"Display Name" <addr>` form; without angle brackets the
/// whole string serves as both name and address. An empty display name falls
/// back to the address.
pub fn parse_sender(from: &str) -> (String, String) {
    if let Some(captures) = sender_regex().captures(from) {
        let name = captures
            .get(1)
            .map_or("", |m| m.as_str())
            .trim()
            .to_string();
        let address = captures
            .get(2)
            .map_or("", |m| m.as_str())
            .trim()
            .to_string();
        if name.is_empty() {
            (address.clone(), address)
        } else {
            (name, address)
        }
    } else {
        let address = from.trim().to_string();
        (address.clone(), address)
    }
}
