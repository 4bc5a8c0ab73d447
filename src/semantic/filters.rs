//! Metadata filters pulled out of free-text questions.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::invoice::{InvoiceRecord, ReimbursementStatus};

/// Field name -> value that must appear (case-insensitively) in that field.
pub type Filters = BTreeMap<String, String>;

/// Checked in this order, first hit wins.
///
/// "reimbursed" precedes the longer phrases, so "partially reimbursed"
/// resolves to Fully Reimbursed. Existing callers rely on that ordering.
const STATUS_KEYWORDS: [(&str, ReimbursementStatus); 5] = [
    ("declined", ReimbursementStatus::Declined),
    ("reimbursed", ReimbursementStatus::FullyReimbursed),
    ("partial", ReimbursementStatus::PartiallyReimbursed),
    ("partially reimbursed", ReimbursementStatus::PartiallyReimbursed),
    ("fully reimbursed", ReimbursementStatus::FullyReimbursed),
];

static EMPLOYEE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:for|by) ([A-Z][a-z]+(?: [A-Z][a-z]+)*)").unwrap());

static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4}[-/]\d{2}[-/]\d{2})").unwrap());

/// Derive status, employee and date filters from a question.
///
/// Only keys that were found are present; an empty map means "no filter".
pub fn extract_filters(query: &str) -> Filters {
    let mut filters = Filters::new();
    let lowered = query.to_lowercase();

    if let Some((_, status)) = STATUS_KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
    {
        filters.insert("status".to_string(), status.to_string());
    }

    if let Some(caps) = EMPLOYEE_RE.captures(query) {
        filters.insert("employee_name".to_string(), caps[1].to_string());
    }

    if let Some(caps) = DATE_RE.captures(query) {
        filters.insert("date".to_string(), caps[1].to_string());
    }

    filters
}

/// True when every filter value occurs in the named field, ignoring case.
///
/// A filter on a name that is not a record field never matches.
pub fn matches(filters: &Filters, record: &InvoiceRecord) -> bool {
    filters.iter().all(|(key, value)| {
        record
            .field(key)
            .map(|field| field.to_lowercase().contains(&value.to_lowercase()))
            .unwrap_or(false)
    })
}
