//! Language model client and the prompts sent to it.

use std::time::Duration;

use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::semantic::SearchHit;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API key not set; export {0}")]
    MissingApiKey(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("model returned no text")]
    EmptyResponse,
}

/// Text-in, text-out generation.
pub trait LanguageModel: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Gemini `generateContent` over the REST API.
pub struct GeminiClient {
    client: reqwest::blocking::Client,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(model: &str, api_key: &str, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Build a client from config, reading the key from the configured env var.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => key,
            _ => return Err(LlmError::MissingApiKey(config.api_key_env.clone())),
        };

        Self::new(
            &config.model,
            &api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Joins the text parts of the first candidate.
    fn extract_text(resp: &Value) -> Option<String> {
        let parts = resp
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(|parts| parts.as_array())?;

        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect();

        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl LanguageModel for GeminiClient {
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, self.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            log::warn!("gemini error: status={status} body={body}");
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let resp = resp.json::<Value>()?;
        Self::extract_text(&resp).ok_or(LlmError::EmptyResponse)
    }
}

/// Prompt asking the model to judge one invoice against the policy.
pub fn analysis_prompt(policy_text: &str, invoice_text: &str, employee_name: &str) -> String {
    format!(
        r#"You are an expert HR reimbursement analyst. Given the following HR reimbursement policy and an employee's invoice, analyze the invoice and determine the reimbursement status. Use these categories: Fully Reimbursed, Partially Reimbursed, Declined. For each, provide a clear, detailed reason based on the policy. Return your answer in this JSON format:
{{
    "status": "<Fully Reimbursed|Partially Reimbursed|Declined>",
    "reason": "<detailed reason>",
    "employee_name": "{employee_name}"
}}

HR Policy:
{policy_text}

Invoice:
{invoice_text}
"#
    )
}

/// Prompt answering a question from retrieved invoice analyses.
pub fn answer_prompt(query: &str, hits: &[SearchHit]) -> String {
    let context = hits
        .iter()
        .map(|hit| {
            let r = &hit.record;
            format!(
                "Invoice ID: {}\nStatus: {}\nReason: {}\nEmployee: {}\nDate: {}",
                r.invoice_id, r.status, r.reason, r.employee_name, r.date
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are an intelligent assistant for invoice reimbursement queries. Given the following user query and a set of relevant invoice analyses, provide a clear, structured, and helpful answer in markdown format. If possible, summarize the findings, highlight any patterns, and answer the user's question directly.

User Query:
{query}

Relevant Invoice Analyses:
{context}
"#
    )
}
