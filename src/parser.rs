use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};

use crate::email::{Email, NO_SUBJECT, parse_sender};
use crate::gmail::{IMPORTANT_LABEL, MessagePart, RawMessage, STARRED_LABEL, UNREAD_LABEL};

/// Converts a raw provider message into a normalized [`Email`].
///
/// Returns `None` when the message is missing an identifier, a body
/// container, or a sender address; everything else degrades to empty fields
/// or the snippet. Pure function, no side effects.
pub fn parse_message(raw: &RawMessage) -> Option<Email> {
    let id = raw.id.clone().filter(|id| !id.is_empty())?;
    let payload = raw.payload.as_ref()?;

    let from = header_value(payload, "From");
    let (from_name, from_email) = parse_sender(&from);
    if from_email.is_empty() {
        return None;
    }

    let subject = match header_value(payload, "Subject") {
        s if s.is_empty() => NO_SUBJECT.to_string(),
        s => s,
    };

    let mut body_text = find_body(payload, "text/plain");
    let body_html = find_body(payload, "text/html");
    if body_text.is_empty() && body_html.is_empty() {
        body_text = raw.snippet.clone();
    }

    let date = raw
        .internal_date
        .as_deref()
        .and_then(parse_internal_date)
        .or_else(|| parse_header_date(&header_value(payload, "Date")))
        .unwrap_or_else(Utc::now);

    let has_label = |label: &str| raw.label_ids.iter().any(|l| l == label);

    Some(Email {
        id,
        thread_id: raw.thread_id.clone().unwrap_or_default(),
        from_name,
        from_email,
        subject,
        snippet: raw.snippet.clone(),
        body_text,
        body_html,
        date,
        unread: has_label(UNREAD_LABEL),
        starred: has_label(STARRED_LABEL),
        important: has_label(IMPORTANT_LABEL),
        label_ids: raw.label_ids.clone(),
    })
}

/// Case-insensitive header lookup; first match wins, missing is empty.
fn header_value(payload: &MessagePart, name: &str) -> String {
    payload
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
        .unwrap_or_default()
}

/// Depth-first search for the first part of the given MIME type.
///
/// A part-less payload is classified by its own MIME type. Decode failures
/// yield empty text for that branch rather than an error.
fn find_body(part: &MessagePart, mime_type: &str) -> String {
    if part.mime_type == mime_type
        && let Some(body) = &part.body
        && let Some(data) = &body.data
    {
        return decode_body(data);
    }

    for child in &part.parts {
        let text = find_body(child, mime_type);
        if !text.is_empty() {
            return text;
        }
    }

    String::new()
}

/// Base64url-decodes then UTF-8-decodes part content.
fn decode_body(data: &str) -> String {
    // Gmail emits unpadded base64url; strip padding in case a proxy re-adds it.
    let trimmed = data.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

/// Parses the provider's internal timestamp (milliseconds since epoch).
fn parse_internal_date(value: &str) -> Option<DateTime<Utc>> {
    let millis = value.parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Parses an RFC-style Date header, trying the common format variants.
fn parse_header_date(date_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S %z",
        "%a, %d %b %Y %H:%M:%S %Z",
    ];

    for fmt in &formats {
        if let Ok(dt) = DateTime::parse_from_str(date_str, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    None
}
