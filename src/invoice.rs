use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// Outcome of checking an invoice against the reimbursement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReimbursementStatus {
    #[serde(rename = "Fully Reimbursed")]
    FullyReimbursed,
    #[serde(rename = "Partially Reimbursed")]
    PartiallyReimbursed,
    #[serde(rename = "Declined")]
    Declined,
}

impl ReimbursementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReimbursementStatus::FullyReimbursed => "Fully Reimbursed",
            ReimbursementStatus::PartiallyReimbursed => "Partially Reimbursed",
            ReimbursementStatus::Declined => "Declined",
        }
    }
}

impl Display for ReimbursementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown reimbursement status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for ReimbursementStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fully reimbursed" => Ok(ReimbursementStatus::FullyReimbursed),
            "partially reimbursed" => Ok(ReimbursementStatus::PartiallyReimbursed),
            "declined" => Ok(ReimbursementStatus::Declined),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Names of the record fields that filters may target.
pub const FIELD_NAMES: [&str; 5] = ["invoice_id", "status", "reason", "employee_name", "date"];

/// Metadata kept for every indexed invoice analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub invoice_id: String,
    pub status: ReimbursementStatus,
    pub reason: String,
    pub employee_name: String,
    /// Analysis date, `YYYY-MM-DD`.
    pub date: String,
}

impl InvoiceRecord {
    /// String value of a field by name, `None` for names that are not fields.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "invoice_id" => Some(&self.invoice_id),
            "status" => Some(self.status.as_str()),
            "reason" => Some(&self.reason),
            "employee_name" => Some(&self.employee_name),
            "date" => Some(&self.date),
            _ => None,
        }
    }
}

/// A freshly analyzed invoice on its way into the store.
///
/// `full_text` only feeds the embedding and is never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzedInvoice {
    #[serde(flatten)]
    pub record: InvoiceRecord,
    #[serde(skip_serializing)]
    pub full_text: String,
}

impl AnalyzedInvoice {
    /// Text that gets embedded for this invoice.
    pub fn embedding_text(&self) -> String {
        format!(
            "{}\nStatus: {}\nReason: {}",
            self.full_text, self.record.status, self.record.reason
        )
    }
}

/// Today's date in the format stored on records.
pub fn today() -> String {
    chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> InvoiceRecord {
        InvoiceRecord {
            invoice_id: "taxi.pdf".to_string(),
            status: ReimbursementStatus::Declined,
            reason: "Taxi rides are not covered".to_string(),
            employee_name: "Jane Doe".to_string(),
            date: "2024-05-01".to_string(),
        }
    }

    #[test]
    fn test_status_parse_is_lenient_about_case() {
        assert_eq!(
            " fully REIMBURSED ".parse::<ReimbursementStatus>().unwrap(),
            ReimbursementStatus::FullyReimbursed
        );
        assert_eq!(
            "Partially Reimbursed".parse::<ReimbursementStatus>().unwrap(),
            ReimbursementStatus::PartiallyReimbursed
        );
        assert!("approved".parse::<ReimbursementStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_as_label() {
        let json = serde_json::to_string(&ReimbursementStatus::PartiallyReimbursed).unwrap();
        assert_eq!(json, "\"Partially Reimbursed\"");
    }

    #[test]
    fn test_field_lookup() {
        let record = record();
        assert_eq!(record.field("status"), Some("Declined"));
        assert_eq!(record.field("employee_name"), Some("Jane Doe"));
        assert_eq!(record.field("amount"), None);
        for name in FIELD_NAMES {
            assert!(record.field(name).is_some());
        }
    }

    #[test]
    fn test_embedding_text_layout() {
        let invoice = AnalyzedInvoice {
            record: record(),
            full_text: "Taxi fare $50".to_string(),
        };
        assert_eq!(
            invoice.embedding_text(),
            "Taxi fare $50\nStatus: Declined\nReason: Taxi rides are not covered"
        );
    }

    #[test]
    fn test_full_text_not_serialized() {
        let invoice = AnalyzedInvoice {
            record: record(),
            full_text: "secret body".to_string(),
        };
        let json = serde_json::to_value(&invoice).unwrap();
        assert!(json.get("full_text").is_none());
        assert_eq!(json["invoice_id"], "taxi.pdf");
    }

    #[test]
    fn test_today_format() {
        let date = today();
        assert_eq!(date.len(), 10);
        assert!(chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_ok());
    }
}
