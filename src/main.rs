use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

mod analysis;
mod app;
mod cli;
mod config;
mod extract;
mod invoice;
mod llm;
mod semantic;
#[cfg(test)]
mod tests;
mod web;

use app::App;
use config::Config;
use llm::{GeminiClient, LanguageModel, LlmError};
use semantic::{extract_filters, EmbeddingModel, Filters, InvoiceStore};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_store(config: &Config) -> anyhow::Result<Arc<InvoiceStore>> {
    let embedder = EmbeddingModel::new(
        &config.embedding.model,
        config.base_path().to_path_buf(),
        Some(std::time::Duration::from_secs(
            config.embedding.download_timeout_secs,
        )),
    )?;

    let store = InvoiceStore::load(
        config.base_path(),
        Arc::new(embedder),
        config.search.strategy,
    )
    .with_context(|| format!("failed to open store in {}", config.base_path().display()))?;

    Ok(Arc::new(store))
}

fn open_llm(config: &Config) -> anyhow::Result<Option<Arc<dyn LanguageModel>>> {
    match GeminiClient::from_config(&config.llm) {
        Ok(client) => Ok(Some(Arc::new(client))),
        Err(LlmError::MissingApiKey(var)) => {
            log::warn!("{var} is not set, analysis and chat are unavailable");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = cli::Args::parse();

    // needs neither the model nor the store
    if let cli::Command::Filters { query } = &args.command {
        println!("{}", serde_json::to_string_pretty(&extract_filters(query))?);
        return Ok(());
    }

    let mut config = Config::load()?;
    if let cli::Command::Serve {
        listen: Some(listen),
    } = &args.command
    {
        config.server.listen_addr = listen.clone();
    }

    let store = open_store(&config)?;
    let llm = open_llm(&config)?;
    let app = App::new(config, store, llm);

    match args.command {
        cli::Command::Filters { .. } => Ok(()),

        cli::Command::Serve { .. } => web::start_daemon(app),

        cli::Command::Analyze {
            policy,
            invoices,
            employee,
        } => {
            let policy_pdf = std::fs::read(&policy)
                .with_context(|| format!("failed to read {}", policy.display()))?;
            let invoices_zip = std::fs::read(&invoices)
                .with_context(|| format!("failed to read {}", invoices.display()))?;

            let progress = ProgressBar::new(0);
            progress.set_style(
                ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
                    .progress_chars("##-"),
            );

            let report =
                app.analyze_invoices(&policy_pdf, &invoices_zip, &employee, Some(&progress))?;
            progress.finish_and_clear();

            println!("{}", serde_json::to_string_pretty(&report.analyses)?);
            println!(
                "{} analyzed, {} stored, {} failed",
                report.analyses.len(),
                report.stored,
                report.failed()
            );
            Ok(())
        }

        cli::Command::Search {
            query,
            top_k,
            status,
            employee,
            date,
            count,
        } => {
            let mut filters = Filters::new();
            if let Some(status) = status {
                filters.insert("status".to_string(), status);
            }
            if let Some(employee) = employee {
                filters.insert("employee_name".to_string(), employee);
            }
            if let Some(date) = date {
                filters.insert("date".to_string(), date);
            }
            let filters = (!filters.is_empty()).then_some(filters);

            let hits = app.search(&query, top_k, filters)?;

            if count {
                println!("{} invoices found", hits.len());
                return Ok(());
            }

            println!("{}", serde_json::to_string_pretty(&hits)?);
            Ok(())
        }

        cli::Command::Ask { question } => {
            let answer = app.chat(&question)?;
            println!("{answer}");
            Ok(())
        }

        cli::Command::List {} => {
            let records = app.store().records()?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
    }
}
