//! Row validation and normalization
//!
//! Turns one tokenized CSV row into a [`ContactRecord`], or a [`RowError`]
//! tagged with the 1-based source line number.

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::services::column_mapper::{ColumnMap, ContactField};
use crate::types::{ContactRecord, ContactStatus};

/// Intentionally permissive: `x@y.z` with no whitespace or extra `@`
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid static email regex"));

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

/// Why a row was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowErrorKind {
    #[error("Missing first name")]
    MissingFirstName,
    #[error("Missing email")]
    MissingEmail,
    #[error("Invalid email format: {0}")]
    InvalidEmail(String),
}

/// A row-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Row {row}: {kind}")]
pub struct RowError {
    /// 1-based line number in the source file (header is row 1)
    pub row: usize,
    pub kind: RowErrorKind,
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Strip surrounding whitespace and single/double quotes
fn clean(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

fn field<'a>(row: &'a [String], map: &ColumnMap, f: ContactField) -> Option<&'a str> {
    map.get(f)
        .and_then(|idx| row.get(idx))
        .map(|v| clean(v))
        .filter(|v| !v.is_empty())
}

/// Split a tags cell on `;`, `,` and `|`, dropping empty tokens and repeats
pub fn parse_tags(raw: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.split([';', ',', '|']).map(str::trim).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Parse a subscribe date. Returns `None` for anything unrecognized.
pub fn parse_subscribe_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Validate and normalize one row.
///
/// `row_number` is the 1-based source line, `today` is the fallback
/// subscribe date.
pub fn validate_row(
    row: &[String],
    map: &ColumnMap,
    row_number: usize,
    selected_lists: &[String],
    today: NaiveDate,
) -> Result<ContactRecord, RowError> {
    let reject = |kind| RowError { row: row_number, kind };

    let email = field(row, map, ContactField::Email).map(str::to_lowercase);
    let first_name = field(row, map, ContactField::FirstName).map(str::to_string);

    let status = field(row, map, ContactField::Status)
        .and_then(ContactStatus::parse)
        .unwrap_or_default();
    let tags = field(row, map, ContactField::Tags).map(parse_tags).unwrap_or_default();
    let subscribe_date = field(row, map, ContactField::SubscribeDate)
        .and_then(parse_subscribe_date)
        .unwrap_or(today);

    let first_name = first_name.ok_or_else(|| reject(RowErrorKind::MissingFirstName))?;
    let email = email.ok_or_else(|| reject(RowErrorKind::MissingEmail))?;
    if !is_valid_email(&email) {
        return Err(reject(RowErrorKind::InvalidEmail(email)));
    }

    Ok(ContactRecord {
        first_name,
        last_name: field(row, map, ContactField::LastName).map(str::to_string),
        email,
        status,
        tags,
        subscribe_date,
        notes: field(row, map, ContactField::Notes).map(str::to_string),
        list_ids: selected_lists.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::csv_tokenizer::parse_csv_line;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn full_map() -> ColumnMap {
        ColumnMap::from_headers(&["email", "first_name", "last_name", "status", "tags", "subscribe_date", "notes"])
    }

    #[test]
    fn test_valid_row_is_normalized() {
        let row = parse_csv_line(r#"  John@Example.COM ,'John',Doe,BOUNCED,"vip; news|vip,",2024-03-05,likes cats"#);
        let record = validate_row(&row, &full_map(), 2, &["list-1".to_string()], today()).unwrap();

        assert_eq!(record.email, "john@example.com");
        assert_eq!(record.first_name, "John");
        assert_eq!(record.last_name.as_deref(), Some("Doe"));
        assert_eq!(record.status, ContactStatus::Bounced);
        assert_eq!(record.tags, vec!["vip".to_string(), "news".to_string()]);
        assert_eq!(record.subscribe_date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(record.notes.as_deref(), Some("likes cats"));
        assert_eq!(record.list_ids, vec!["list-1".to_string()]);
    }

    #[test]
    fn test_unknown_status_forced_to_active() {
        let row = parse_csv_line("a@x.com,A,,pending,,,");
        let record = validate_row(&row, &full_map(), 2, &[], today()).unwrap();
        assert_eq!(record.status, ContactStatus::Active);
    }

    #[test]
    fn test_missing_or_bad_date_defaults_to_today() {
        let map = full_map();
        let missing = validate_row(&parse_csv_line("a@x.com,A"), &map, 2, &[], today()).unwrap();
        assert_eq!(missing.subscribe_date, today());

        let bad = validate_row(&parse_csv_line("a@x.com,A,,,,yesterday,"), &map, 2, &[], today()).unwrap();
        assert_eq!(bad.subscribe_date, today());
    }

    #[test]
    fn test_rfc3339_date_keeps_date_only() {
        assert_eq!(
            parse_subscribe_date("2025-12-31T23:00:00+00:00"),
            NaiveDate::from_ymd_opt(2025, 12, 31)
        );
        assert_eq!(parse_subscribe_date("31.12.2025"), NaiveDate::from_ymd_opt(2025, 12, 31));
        assert_eq!(parse_subscribe_date("12/31/2025"), NaiveDate::from_ymd_opt(2025, 12, 31));
    }

    #[test]
    fn test_bad_email_rejected_with_row_number() {
        let row = parse_csv_line("not-an-email,Bob");
        let err = validate_row(&row, &full_map(), 7, &[], today()).unwrap_err();
        assert_eq!(err.row, 7);
        assert_eq!(err.kind, RowErrorKind::InvalidEmail("not-an-email".to_string()));
        assert!(err.to_string().contains("Row 7"));
    }

    #[test]
    fn test_missing_first_name_checked_before_email() {
        let row = parse_csv_line(",  ");
        let err = validate_row(&row, &full_map(), 3, &[], today()).unwrap_err();
        assert_eq!(err.kind, RowErrorKind::MissingFirstName);
    }

    #[test]
    fn test_empty_email_rejected() {
        let row = parse_csv_line(r#""",Ann"#);
        let err = validate_row(&row, &full_map(), 4, &[], today()).unwrap_err();
        assert_eq!(err.kind, RowErrorKind::MissingEmail);
    }

    #[test]
    fn test_short_row_treats_missing_cells_as_empty() {
        let row = parse_csv_line("a@x.com");
        let err = validate_row(&row, &full_map(), 5, &[], today()).unwrap_err();
        assert_eq!(err.kind, RowErrorKind::MissingFirstName);
    }

    #[test]
    fn test_email_pattern() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last+tag@sub.example.org"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.d"));
        assert!(!is_valid_email("a@@b.c"));
    }
}
