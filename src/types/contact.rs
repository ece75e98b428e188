//! Contact types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::Type;

/// Contact subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "contact_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Active,
    Unsubscribed,
    Bounced,
}

impl Default for ContactStatus {
    fn default() -> Self {
        ContactStatus::Active
    }
}

impl ContactStatus {
    /// Parse a status cell. Input is title-cased before matching, so
    /// `"BOUNCED"` and `"bounced"` are both accepted.
    pub fn parse(s: &str) -> Option<Self> {
        match title_case(s.trim()).as_str() {
            "Active" => Some(ContactStatus::Active),
            "Unsubscribed" => Some(ContactStatus::Unsubscribed),
            "Bounced" => Some(ContactStatus::Bounced),
            _ => None,
        }
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
        None => String::new(),
    }
}

/// Normalized contact produced from one CSV row, ready for the contact sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub first_name: String,
    pub last_name: Option<String>,
    /// Always lower-cased; the only de-duplication key
    pub email: String,
    pub status: ContactStatus,
    pub tags: Vec<String>,
    pub subscribe_date: NaiveDate,
    pub notes: Option<String>,
    pub list_ids: Vec<String>,
}

/// Outcome of a create call against the contact sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactInsert {
    Created,
    /// Another writer stored this email first
    AlreadyExists,
}
