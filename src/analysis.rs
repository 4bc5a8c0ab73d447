//! Per-invoice analysis with the language model.
//!
//! Each invoice is analyzed independently on a bounded thread pool; failures
//! stay attached to their invoice and never abort the batch.

use indicatif::ProgressBar;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::extract::{ExtractedInvoice, ERROR_SENTINEL};
use crate::invoice::{AnalyzedInvoice, InvoiceRecord, ReimbursementStatus};
use crate::llm::{self, LanguageModel, LlmError};

static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^```(?:json)?|```$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Extraction(String),

    #[error("LLM analysis failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Failed to parse LLM output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid status in LLM output: {0}")]
    InvalidStatus(String),
}

/// Result of analyzing one invoice.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AnalysisOutcome {
    Analyzed(AnalyzedInvoice),
    Failed { invoice_id: String, error: String },
}

impl AnalysisOutcome {
    pub fn invoice_id(&self) -> &str {
        match self {
            AnalysisOutcome::Analyzed(invoice) => &invoice.record.invoice_id,
            AnalysisOutcome::Failed { invoice_id, .. } => invoice_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisOutcome::Analyzed(_))
    }
}

/// Turn a model reply into an analyzed invoice.
///
/// Leading/trailing code fences are stripped before parsing. `status` is
/// required; `reason` defaults to empty and `employee_name` to the name the
/// invoices were submitted under.
pub fn parse_analysis(
    reply: &str,
    invoice_id: &str,
    default_employee: &str,
    date: &str,
    full_text: &str,
) -> Result<AnalyzedInvoice, AnalysisError> {
    let cleaned = CODE_FENCE_RE.replace_all(reply, "");
    let value: Value = serde_json::from_str(cleaned.trim())?;

    let status = value
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AnalysisError::InvalidStatus("missing \"status\"".to_string()))?
        .parse::<ReimbursementStatus>()
        .map_err(|e| AnalysisError::InvalidStatus(e.to_string()))?;

    let reason = value
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let employee_name = value
        .get("employee_name")
        .and_then(|v| v.as_str())
        .unwrap_or(default_employee)
        .to_string();

    Ok(AnalyzedInvoice {
        record: InvoiceRecord {
            invoice_id: invoice_id.to_string(),
            status,
            reason,
            employee_name,
            date: date.to_string(),
        },
        full_text: full_text.to_string(),
    })
}

fn analyze_one(
    llm: &dyn LanguageModel,
    policy_text: &str,
    invoice_id: &str,
    text: &str,
    employee_name: &str,
    date: &str,
) -> Result<AnalyzedInvoice, AnalysisError> {
    if text.starts_with(ERROR_SENTINEL) {
        return Err(AnalysisError::Extraction(text.to_string()));
    }

    let prompt = llm::analysis_prompt(policy_text, text, employee_name);
    let reply = llm.generate(&prompt)?;
    parse_analysis(&reply, invoice_id, employee_name, date, text)
}

/// Analyze a single extracted invoice.
pub fn process_invoice(
    llm: &dyn LanguageModel,
    policy_text: &str,
    invoice: &ExtractedInvoice,
    employee_name: &str,
    date: &str,
) -> AnalysisOutcome {
    let result = match &invoice.text {
        Ok(text) => analyze_one(llm, policy_text, &invoice.name, text, employee_name, date),
        Err(err) => Err(AnalysisError::Extraction(err.clone())),
    };

    match result {
        Ok(analyzed) => AnalysisOutcome::Analyzed(analyzed),
        Err(err) => {
            log::warn!("invoice {}: {}", invoice.name, err);
            AnalysisOutcome::Failed {
                invoice_id: invoice.name.clone(),
                error: err.to_string(),
            }
        }
    }
}

/// Analyze a batch in parallel on at most `max_threads` threads.
///
/// Outcomes come back in input order.
pub fn analyze_batch(
    llm: &dyn LanguageModel,
    policy_text: &str,
    invoices: &[ExtractedInvoice],
    employee_name: &str,
    date: &str,
    max_threads: usize,
    progress: Option<&ProgressBar>,
) -> anyhow::Result<Vec<AnalysisOutcome>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_threads.max(1))
        .thread_name(|i| format!("analysis-{i}"))
        .build()?;

    let outcomes = pool.install(|| {
        invoices
            .par_iter()
            .map(|invoice| {
                let outcome = process_invoice(llm, policy_text, invoice, employee_name, date);
                if let Some(progress) = progress {
                    progress.inc(1);
                }
                outcome
            })
            .collect::<Vec<_>>()
    });

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    log::info!(
        "Analyzed {} invoices ({} failed)",
        outcomes.len(),
        failed
    );

    Ok(outcomes)
}
