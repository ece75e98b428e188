//! Header-to-field mapping for contact CSVs
//!
//! Uploaded files come from many tools (spreadsheets, other ESPs, CRM exports)
//! and name their columns differently. Each header is normalized and matched
//! against a synonym list, falling back to a substring match on the canonical
//! field name.

use std::collections::HashMap;

use crate::services::chunk_scheduler::ImportError;

/// Canonical contact fields a CSV column can map to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactField {
    Email,
    FirstName,
    LastName,
    Status,
    Tags,
    SubscribeDate,
    Notes,
}

impl ContactField {
    pub const ALL: [ContactField; 7] = [
        ContactField::Email,
        ContactField::FirstName,
        ContactField::LastName,
        ContactField::Status,
        ContactField::Tags,
        ContactField::SubscribeDate,
        ContactField::Notes,
    ];

    /// Fields without which no row can be imported
    pub const REQUIRED: [ContactField; 2] = [ContactField::Email, ContactField::FirstName];

    pub fn canonical_name(&self) -> &'static str {
        match self {
            ContactField::Email => "email",
            ContactField::FirstName => "first_name",
            ContactField::LastName => "last_name",
            ContactField::Status => "status",
            ContactField::Tags => "tags",
            ContactField::SubscribeDate => "subscribe_date",
            ContactField::Notes => "notes",
        }
    }

    /// Normalized header spellings accepted as an exact match
    fn synonyms(&self) -> &'static [&'static str] {
        match self {
            ContactField::Email => &["email", "emailaddress", "mail", "emailid", "contactemail"],
            ContactField::FirstName => &["firstname", "first", "fname", "givenname", "forename", "name"],
            ContactField::LastName => &["lastname", "last", "lname", "surname", "familyname"],
            ContactField::Status => &["status", "subscriptionstatus", "state"],
            ContactField::Tags => &["tags", "tag", "labels", "label", "groups"],
            ContactField::SubscribeDate => &[
                "subscribedate", "subscribedat", "datesubscribed", "signupdate", "optindate", "joined", "date",
            ],
            ContactField::Notes => &["notes", "note", "comments", "comment", "description"],
        }
    }
}

/// Lowercase and strip `_`, spaces and `-`
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '_' | ' ' | '-'))
        .collect()
}

/// Mapping from canonical field to column index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    columns: HashMap<ContactField, usize>,
}

impl ColumnMap {
    /// Build the map from the header row. Unrecognized headers are ignored
    /// and the first matching header wins for each field.
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> Self {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();
        let mut columns = HashMap::new();

        for field in ContactField::ALL {
            let needle = field.canonical_name().replace('_', "");
            let found = normalized.iter().position(|header| {
                !header.is_empty()
                    && (field.synonyms().contains(&header.as_str()) || header.contains(&needle))
            });
            if let Some(idx) = found {
                columns.insert(field, idx);
            }
        }

        Self { columns }
    }

    pub fn get(&self, field: ContactField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Fail unless every required field is mapped
    pub fn require_fields(&self) -> Result<(), ImportError> {
        let missing: Vec<&'static str> = ContactField::REQUIRED
            .iter()
            .filter(|f| !self.columns.contains_key(f))
            .map(|f| f.canonical_name())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ImportError::MissingRequiredColumns(missing.join(", ")))
        }
    }
}
