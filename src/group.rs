use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::email::Email;

/// All retrieved messages from one sender, treated as a single triage unit.
///
/// Invariants: `key` is the lower-cased sender address, `emails` stays sorted
/// by date descending, and within one queue at most one group exists per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderGroup {
    pub key: String,
    /// Display name taken from the most recent email.
    pub name: String,
    pub emails: Vec<Email>,
}

impl SenderGroup {
    pub fn count(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    pub fn email_ids(&self) -> Vec<String> {
        self.emails.iter().map(|e| e.id.clone()).collect()
    }

    pub fn newest_date(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.emails.first().map(|e| e.date)
    }

    /// Inserts one email, keeping the date-descending order.
    pub fn insert_email(&mut self, email: Email) {
        self.emails.push(email);
        self.sort_emails();
    }

    /// Merges another batch of emails from the same sender.
    pub fn merge_emails(&mut self, emails: Vec<Email>) {
        self.emails.extend(emails);
        self.sort_emails();
    }

    /// Removes the listed email ids; returns how many were removed.
    pub fn remove_ids(&mut self, ids: &[String]) -> usize {
        let before = self.emails.len();
        self.emails.retain(|e| !ids.contains(&e.id));
        before - self.emails.len()
    }

    fn sort_emails(&mut self) {
        self.emails.sort_by(|a, b| b.date.cmp(&a.date));
    }
}

/// Partitions emails into sender groups.
///
/// Groups are keyed by the lower-cased sender address, emails within a group
/// are sorted by date descending, and groups are ordered by their newest
/// email's date descending (key ascending as a deterministic tie-break).
pub fn group_by_sender(emails: Vec<Email>) -> Vec<SenderGroup> {
    let mut by_key: HashMap<String, Vec<Email>> = HashMap::new();
    for email in emails {
        by_key.entry(email.sender_key()).or_default().push(email);
    }

    let mut groups: Vec<SenderGroup> = by_key
        .into_iter()
        .map(|(key, mut emails)| {
            emails.sort_by(|a, b| b.date.cmp(&a.date));
            let name = emails[0].from_name.clone();
            SenderGroup { key, name, emails }
        })
        .collect();

    groups.sort_by(|a, b| {
        b.newest_date()
            .cmp(&a.newest_date())
            .then_with(|| a.key.cmp(&b.key))
    });
    groups
}
