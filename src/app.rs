use std::sync::Arc;

use indicatif::ProgressBar;
use serde::Serialize;

use crate::{
    analysis::{self, AnalysisOutcome},
    config::Config,
    extract::{self, ExtractError, ExtractedInvoice},
    invoice::{self, AnalyzedInvoice},
    llm::{self, LanguageModel, LlmError},
    semantic::{extract_filters, Filters, InvoiceStore, SearchHit, StoreError},
};

/// Reply when a question matches no stored invoice.
pub const NO_MATCH_REPLY: &str = "No matching invoices found. Please try a different query.";

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Extract(#[from] ExtractError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

/// Per-invoice outcomes of one analysis request, in archive order.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub analyses: Vec<AnalysisOutcome>,
    /// Number of records appended to the store
    pub stored: usize,
}

impl AnalysisReport {
    pub fn failed(&self) -> usize {
        self.analyses.iter().filter(|a| !a.is_success()).count()
    }
}

pub struct App {
    config: Config,
    store: Arc<InvoiceStore>,
    /// `None` when no API key is configured; search still works then
    llm: Option<Arc<dyn LanguageModel>>,
}

impl App {
    pub fn new(
        config: Config,
        store: Arc<InvoiceStore>,
        llm: Option<Arc<dyn LanguageModel>>,
    ) -> Self {
        Self { config, store, llm }
    }

    fn llm(&self) -> Result<&dyn LanguageModel, AppError> {
        match &self.llm {
            Some(llm) => Ok(llm.as_ref()),
            None => Err(LlmError::MissingApiKey(self.config.llm.api_key_env.clone()).into()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &InvoiceStore {
        &self.store
    }

    /// Extract the policy and every invoice, analyze them and store the
    /// successful analyses.
    pub fn analyze_invoices(
        &self,
        policy_pdf: &[u8],
        invoices_zip: &[u8],
        employee_name: &str,
        progress: Option<&ProgressBar>,
    ) -> Result<AnalysisReport, AppError> {
        let policy_text = extract::extract_pdf_text(policy_pdf).map_err(|err| {
            AppError::BadRequest(format!("Failed to extract policy text: {err}"))
        })?;
        let invoices = extract::extract_invoices_from_zip(invoices_zip)?;

        log::info!(
            "Extracted {} invoices for {}",
            invoices.len(),
            employee_name
        );

        if let Some(progress) = progress {
            progress.set_length(invoices.len() as u64);
        }

        self.analyze_texts(&policy_text, &invoices, employee_name, progress)
    }

    /// Same as [`App::analyze_invoices`] for text that is already extracted.
    pub fn analyze_texts(
        &self,
        policy_text: &str,
        invoices: &[ExtractedInvoice],
        employee_name: &str,
        progress: Option<&ProgressBar>,
    ) -> Result<AnalysisReport, AppError> {
        let employee_name = employee_name.trim();
        if employee_name.is_empty() {
            return Err(AppError::BadRequest("Employee name is required.".into()));
        }

        let llm = self.llm()?;
        let date = invoice::today();
        let analyses = analysis::analyze_batch(
            llm,
            policy_text,
            invoices,
            employee_name,
            &date,
            self.config.analysis.max_threads as usize,
            progress,
        )?;

        let successful: Vec<AnalyzedInvoice> = analyses
            .iter()
            .filter_map(|outcome| match outcome {
                AnalysisOutcome::Analyzed(analyzed) => Some(analyzed.clone()),
                AnalysisOutcome::Failed { .. } => None,
            })
            .collect();

        let stored = self.store.append(successful)?;

        Ok(AnalysisReport { analyses, stored })
    }

    /// Filtered similarity search. Without explicit filters they are
    /// extracted from the query text.
    pub fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        filters: Option<Filters>,
    ) -> Result<Vec<SearchHit>, AppError> {
        let top_k = top_k.unwrap_or(self.config.search.default_top_k);
        let filters = filters.unwrap_or_else(|| extract_filters(query));
        log::debug!("search {query:?} top_k={top_k} filters={filters:?}");

        Ok(self.store.search(query, top_k, &filters)?)
    }

    /// Answer a question from the stored analyses.
    pub fn chat(&self, message: &str) -> Result<String, AppError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AppError::BadRequest("No message provided.".into()));
        }

        let filters = extract_filters(message);
        let hits = self
            .store
            .search(message, self.config.search.chat_top_k, &filters)?;

        if hits.is_empty() {
            log::info!("No invoices match {message:?} (filters {filters:?})");
            return Ok(NO_MATCH_REPLY.to_string());
        }

        let prompt = llm::answer_prompt(message, &hits);
        Ok(self.llm()?.generate(&prompt)?)
    }
}
